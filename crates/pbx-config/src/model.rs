/// A section's parameters, kept in insertion order so `save()` reproduces
/// the order `load()` observed.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub name: String,
    params: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new() }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.push((key.into(), value.into()));
    }

    /// First matching value, the way `getParam` reads a single value out of
    /// a section that may carry repeated keys.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.params.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.params.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.params.push((key, value));
        }
    }

    pub fn clear_key(&mut self, key: &str) {
        self.params.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn extend_from(&mut self, other: &Section) {
        for (k, v) in other.iter() {
            self.params.push((k.to_string(), v.to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A fully parsed configuration: ordered sections, each an ordered
/// key/value list.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    sections: Vec<Section>,
}

impl ConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn get_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn get_section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Returns the existing section or appends and returns a fresh one,
    /// preserving the position sections were first seen in.
    pub fn section_or_create(&mut self, name: &str) -> &mut Section {
        if self.sections.iter().any(|s| s.name == name) {
            self.sections.iter_mut().find(|s| s.name == name).unwrap()
        } else {
            self.sections.push(Section::new(name));
            self.sections.last_mut().unwrap()
        }
    }

    pub fn get_param(&self, section: &str, key: &str) -> Option<&str> {
        self.get_section(section).and_then(|s| s.get(key))
    }

    pub fn get_int_value(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_param(section, key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    }

    pub fn get_double_value(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get_param(section, key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    }

    pub fn get_bool_value(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_param(section, key) {
            None => default,
            Some(v) => parse_bool(v, default),
        }
    }

    /// Typed getter over a token table, for enumerated values backed by a
    /// set of named tokens (e.g. a log-level name).
    pub fn get_enum_value<'a>(
        &self,
        section: &str,
        key: &str,
        tokens: &[(&'a str, i64)],
        default: i64,
    ) -> i64 {
        match self.get_param(section, key) {
            None => default,
            Some(v) => tokens
                .iter()
                .find(|(tok, _)| tok.eq_ignore_ascii_case(v.trim()))
                .map(|(_, val)| *val)
                .unwrap_or(default),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut Vec<Section> {
        &mut self.sections
    }

    /// Serialises to the same textual form `load()` understands, in
    /// section/key order.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (k, v) in section.iter() {
                out.push_str(k);
                out.push('=');
                out.push_str(v);
                out.push('\n');
            }
        }
        out
    }
}

pub(crate) fn parse_bool(v: &str, default: bool) -> bool {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "enable" | "enabled" | "1" => true,
        "false" | "no" | "off" | "disable" | "disabled" | "0" => false,
        _ => default,
    }
}
