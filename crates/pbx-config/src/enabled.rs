use crate::model::parse_bool;

/// Evaluates one `$enabled ...` directive body against the current
/// enabled state: `else`/`toggle` flip it, `elseif <cond>` only evaluates
/// `<cond>` when the state was previously disabled, and otherwise a
/// handful of named predicates (`$not`, `$loaded`, `$unloaded`, `$filled`,
/// `$empty`, `$bool`) or a plain boolean token decide the new state.
pub fn apply_enabled(current: bool, body: &str, plugin_loaded: impl Fn(&str) -> bool) -> bool {
    let body = body.trim();

    if body.eq_ignore_ascii_case("else") || body.eq_ignore_ascii_case("toggle") {
        return !current;
    }

    if let Some(rest) = strip_ci_prefix(body, "elseif") {
        if current {
            return false;
        }
        return eval_condition(rest.trim(), plugin_loaded);
    }

    eval_condition(body, plugin_loaded)
}

fn eval_condition(body: &str, plugin_loaded: impl Fn(&str) -> bool) -> bool {
    let (negate, body) = match strip_ci_prefix(body, "$not") {
        Some(rest) => (true, rest.trim()),
        None => (false, body),
    };

    let value = if let Some(plugin) = strip_ci_prefix(body, "$loaded") {
        plugin_loaded(plugin.trim())
    } else if let Some(plugin) = strip_ci_prefix(body, "$unloaded") {
        !plugin_loaded(plugin.trim())
    } else if let Some(rest) = strip_ci_prefix(body, "$filled") {
        !rest.trim().is_empty()
    } else if let Some(rest) = strip_ci_prefix(body, "$empty") {
        rest.trim().is_empty()
    } else if let Some(rest) = strip_ci_prefix(body, "$bool") {
        parse_bool(rest.trim(), false)
    } else {
        parse_bool(body, false)
    };

    if negate { !value } else { value }
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
