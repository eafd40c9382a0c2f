//! Prometheus metric and label naming rules.

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// Invalid characters become underscores, runs of underscores collapse,
/// and a leading digit gets an underscore prefix.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`.
///
/// Names starting with `__` are reserved by Prometheus and rejected.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// Build the exposed family name, appending `unit` unless already a suffix.
///
/// `("mem", "bytes")` becomes `mem_bytes`; `("latency_seconds", "seconds")`
/// stays unchanged.
pub fn family_name(name: &str, unit: &str) -> String {
    let name = sanitize_metric_name(name);
    if unit.is_empty() {
        return name;
    }

    let unit = sanitize_metric_name(unit);
    if name.ends_with(&format!("_{}", unit)) {
        name
    } else {
        format!("{}_{}", name, unit)
    }
}
