use crate::enabled::apply_enabled;
use crate::error::{ConfigError, ConfigResult};
use crate::model::ConfigFile;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Global knobs read from section `[configuration]`.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub max_depth: Option<u32>,
    pub disable_include_silent: bool,
    pub include_empty: bool,
    pub check_recursive_include: bool,
    pub warnings: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            disable_include_silent: false,
            include_empty: false,
            check_recursive_include: false,
            warnings: true,
        }
    }
}

impl LoaderOptions {
    /// Default include depth cap: 10 when recursion checking is enabled,
    /// 3 otherwise.
    fn effective_max_depth(&self) -> u32 {
        self.max_depth
            .unwrap_or(if self.check_recursive_include { 10 } else { 3 })
    }
}

struct SectionIncludeMarker {
    into_section: String,
    referenced: String,
    require: bool,
}

/// Parses hierarchical `.ini`-like configuration with `$include`/`$require`
/// file inclusion and `$includesection`/`$requiresection` transitive
/// section inclusion.
pub struct Loader<P> {
    options: LoaderOptions,
    plugin_loaded: P,
}

impl<P: Fn(&str) -> bool> Loader<P> {
    pub fn new(plugin_loaded: P) -> Self {
        Self { options: LoaderOptions::default(), plugin_loaded }
    }

    pub fn with_options(plugin_loaded: P, options: LoaderOptions) -> Self {
        Self { options, plugin_loaded }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> ConfigResult<ConfigFile> {
        let path = path.as_ref();
        let mut config = ConfigFile::new();
        let mut markers = Vec::new();
        let mut visited_files: HashSet<PathBuf> = HashSet::new();

        self.load_file(path, 0, &mut config, &mut markers, &mut visited_files)?;

        self.resolve_section_includes(&mut config, markers)?;
        Ok(config)
    }

    pub fn save(&self, config: &ConfigFile, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        fs::write(path, config.to_text()).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn load_file(
        &mut self,
        path: &Path,
        depth: u32,
        config: &mut ConfigFile,
        markers: &mut Vec<SectionIncludeMarker>,
        visited_files: &mut HashSet<PathBuf>,
    ) -> ConfigResult<()> {
        if depth > self.options.effective_max_depth() {
            tracing::warn!(path = %path.display(), depth, "config include depth exceeded");
            return Err(ConfigError::MaxDepthExceeded {
                path: path.display().to_string(),
                max_depth: self.options.effective_max_depth(),
            });
        }

        // Cycle detection only dedups the current include *stack*, not
        // every file ever included, so the same file may appear in two
        // sibling branches.
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.options.check_recursive_include && !visited_files.insert(canonical.clone()) {
            tracing::warn!(path = %path.display(), "recursive config include detected");
            return Err(ConfigError::RecursiveInclude { path: path.display().to_string() });
        }

        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let logical_lines = join_continuations(strip_bom(&text));

        let mut current_section: Option<String> = None;
        let mut enabled = true;

        for raw_line in logical_lines {
            let line = raw_line.trim_end_matches(['\r', '\n']);
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if let Some(inner) = bracket_body(line) {
                let inner = inner.trim();
                if inner.is_empty() {
                    tracing::warn!("empty section name ignored");
                    continue;
                }

                if let Some(body) = strip_ci(inner, "$enabled") {
                    enabled = apply_enabled(enabled, body, &self.plugin_loaded);
                    continue;
                }
                if !enabled {
                    continue;
                }

                if let Some((kind, body)) = match_section_include_directive(inner) {
                    let into = current_section.clone().unwrap_or_default();
                    config.section_or_create(&into);
                    markers.push(SectionIncludeMarker {
                        into_section: into,
                        referenced: body.trim().to_string(),
                        require: kind == IncludeKind::Require,
                    });
                    continue;
                }

                if let Some((kind, body)) = match_file_include_directive(inner) {
                    let silent = kind == IncludeKind::Silent && !self.options.disable_include_silent;
                    let fatal = kind == IncludeKind::Require;
                    let target = body.trim();
                    let resolved = self.resolve_include_target(path, target);
                    let result =
                        self.include_files(&resolved, depth, config, markers, visited_files);
                    if let Err(e) = result {
                        if fatal {
                            return Err(e);
                        }
                        if !silent && self.options.warnings {
                            tracing::warn!(error = %e, "config include failed");
                        }
                    }
                    continue;
                }

                current_section = Some(inner.to_string());
                config.section_or_create(inner);
                continue;
            }

            if !enabled {
                continue;
            }

            match current_section.as_deref() {
                Some(section_name) => {
                    if let Some((k, v)) = split_kv(line) {
                        config.section_or_create(section_name).push(k, v);
                        if section_name == "configuration" {
                            self.apply_knob(k, v);
                        }
                    } else if self.options.warnings {
                        tracing::warn!(line, "dropping malformed parameter line");
                    }
                }
                None => {
                    if self.options.warnings {
                        tracing::warn!(line, "parameter line before any section, dropped");
                    }
                }
            }
        }

        if self.options.check_recursive_include {
            visited_files.remove(&canonical);
        }
        Ok(())
    }

    fn apply_knob(&mut self, key: &str, value: &str) {
        match key {
            "max_depth" => self.options.max_depth = value.trim().parse().ok(),
            "disable_include_silent" => {
                self.options.disable_include_silent = crate::model::parse_bool(value, false)
            }
            "include_empty" => self.options.include_empty = crate::model::parse_bool(value, false),
            "check_recursive_include" => {
                self.options.check_recursive_include = crate::model::parse_bool(value, false)
            }
            "warnings" => self.options.warnings = crate::model::parse_bool(value, true),
            _ => {}
        }
    }

    fn resolve_include_target(&self, current_file: &Path, target: &str) -> PathBuf {
        if target.is_empty() && self.options.include_empty {
            return current_file.parent().map(Path::to_path_buf).unwrap_or_default();
        }
        let candidate = PathBuf::from(target);
        if candidate.is_absolute() {
            candidate
        } else {
            current_file.parent().map(|p| p.join(&candidate)).unwrap_or(candidate)
        }
    }

    fn include_files(
        &mut self,
        target: &Path,
        depth: u32,
        config: &mut ConfigFile,
        markers: &mut Vec<SectionIncludeMarker>,
        visited_files: &mut HashSet<PathBuf>,
    ) -> ConfigResult<()> {
        if target.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(target)
                .map_err(|e| ConfigError::Read { path: target.display().to_string(), reason: e.to_string() })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    !name.starts_with('.')
                        && !name.ends_with('~')
                        && !name.ends_with(".bak")
                        && !name.ends_with(".tmp")
                })
                .collect();
            entries.sort();
            for entry in entries {
                self.load_file(&entry, depth + 1, config, markers, visited_files)?;
            }
            Ok(())
        } else {
            self.load_file(target, depth + 1, config, markers, visited_files)
        }
    }

    /// Replaces each queued section-include marker with the referenced
    /// section's parameters, transitively, detecting cycles.
    fn resolve_section_includes(
        &self,
        config: &mut ConfigFile,
        markers: Vec<SectionIncludeMarker>,
    ) -> ConfigResult<()> {
        if markers.is_empty() {
            return Ok(());
        }

        // Edges run referenced -> into_section so a topological order visits
        // a section's own includes before any section that includes it,
        // making transitive expansion a single forward pass.
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: FxHashMap<String, petgraph::graph::NodeIndex> = FxHashMap::default();
        for marker in &markers {
            let referenced = *nodes
                .entry(marker.referenced.clone())
                .or_insert_with(|| graph.add_node(marker.referenced.clone()));
            let into = *nodes
                .entry(marker.into_section.clone())
                .or_insert_with(|| graph.add_node(marker.into_section.clone()));
            graph.add_edge(referenced, into, ());
        }
        if is_cyclic_directed(&graph) {
            let offender = markers.iter().find(|m| m.require).unwrap_or(&markers[0]);
            return Err(ConfigError::RecursiveSectionInclude { section: offender.referenced.clone() });
        }

        let order = petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| ConfigError::RecursiveSectionInclude { section: graph[cycle.node_id()].clone() })?;
        for node in order {
            let name = graph[node].clone();
            for marker in markers.iter().filter(|m| m.into_section == name) {
                let expansion = config.get_section(&marker.referenced).cloned();
                let Some(expansion) = expansion else { continue };
                config.section_or_create(&marker.into_section).extend_from(&expansion);
            }
        }
        Ok(())
    }
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Joins physical lines ending in a backslash into one logical line.
fn join_continuations(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    for line in text.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
        } else {
            pending.push_str(line);
            out.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        out.push(pending);
    }
    out
}

fn bracket_body(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('[') {
        rest.find(']').map(|idx| &rest[..idx])
    } else {
        None
    }
}

fn split_kv(line: &str) -> Option<(&str, &str)> {
    line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
}

fn strip_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(s[prefix.len()..].trim())
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncludeKind {
    Include,
    Require,
    Silent,
}

fn match_file_include_directive(inner: &str) -> Option<(IncludeKind, &str)> {
    if let Some(rest) = strip_ci(inner, "$includesilent") {
        return Some((IncludeKind::Silent, rest));
    }
    if let Some(rest) = strip_ci(inner, "$require") {
        return Some((IncludeKind::Require, rest));
    }
    if let Some(rest) = strip_ci(inner, "$include") {
        return Some((IncludeKind::Include, rest));
    }
    None
}

fn match_section_include_directive(inner: &str) -> Option<(IncludeKind, &str)> {
    if let Some(rest) = strip_ci(inner, "$includesectionsilent") {
        return Some((IncludeKind::Silent, rest));
    }
    if let Some(rest) = strip_ci(inner, "$requiresection") {
        return Some((IncludeKind::Require, rest));
    }
    if let Some(rest) = strip_ci(inner, "$includesection") {
        return Some((IncludeKind::Include, rest));
    }
    None
}
