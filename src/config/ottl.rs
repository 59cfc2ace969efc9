//! OTTL expression builders
//!
//! The collector parses these strings; the compiler only concatenates them.
//! Output must stay byte-stable, so every filter and transform expression in
//! this crate is assembled here.

/// `resource.attributes["k8s.namespace.name"] == "<namespace>"`
pub fn namespace_equals(namespace: &str) -> String {
    resource_attribute_equals("k8s.namespace.name", namespace)
}

/// `resource.attributes["<key>"] == "<value>"`
pub fn resource_attribute_equals(key: &str, value: &str) -> String {
    format!(r#"resource.attributes["{key}"] == "{value}""#)
}

/// `resource.attributes["<key>"] != "<value>"`
pub fn resource_attribute_not_equals(key: &str, value: &str) -> String {
    format!(r#"resource.attributes["{key}"] != "{value}""#)
}

/// `resource.attributes["<key>"] != nil`
pub fn resource_attribute_is_not_nil(key: &str) -> String {
    format!(r#"resource.attributes["{key}"] != nil"#)
}

/// `instrumentation_scope.name == "<name>"`
pub fn scope_name_equals(name: &str) -> String {
    format!(r#"instrumentation_scope.name == "{name}""#)
}

/// `name == "<name>"`
pub fn name_attribute_equals(name: &str) -> String {
    format!(r#"name == "{name}""#)
}

/// `IsMatch(<key>, "<regex>")`. The key is emitted as-is, so callers pass
/// a path such as `name` or `attributes["interface"]`.
pub fn is_match(key: &str, regex: &str) -> String {
    format!(r#"IsMatch({key}, "{regex}")"#)
}

/// `HasAttrOnDatapoint("<key>", "<value>")`
pub fn has_attr_on_datapoint(key: &str, value: &str) -> String {
    format!(r#"HasAttrOnDatapoint("{key}", "{value}")"#)
}

/// `(a or b or ...)`, always parenthesised
pub fn join_with_or<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" or ");
    format!("({joined})")
}

/// `a and b and ...`, without outer parentheses
pub fn join_with_and<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" and ")
}

/// `not(<expr>)`. An operand that is already wrapped in one balanced pair of
/// parentheses is not wrapped again.
pub fn not(expr: &str) -> String {
    if is_wrapped_in_parens(expr) {
        format!("not{expr}")
    } else {
        format!("not({expr})")
    }
}

/// True when the first `(` closes exactly at the last character.
fn is_wrapped_in_parens(expr: &str) -> bool {
    if !expr.starts_with('(') || !expr.ends_with(')') {
        return false;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let last = expr.len() - 1;
    for (i, c) in expr.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_equals() {
        assert_eq!(
            namespace_equals("default"),
            r#"resource.attributes["k8s.namespace.name"] == "default""#
        );
    }

    #[test]
    fn test_scope_and_name_conditions() {
        assert_eq!(
            scope_name_equals("io.kyma-project.telemetry/runtime"),
            r#"instrumentation_scope.name == "io.kyma-project.telemetry/runtime""#
        );
        assert_eq!(name_attribute_equals("up"), r#"name == "up""#);
        assert_eq!(
            is_match("name", "^k8s.pod.*"),
            r#"IsMatch(name, "^k8s.pod.*")"#
        );
        assert_eq!(
            has_attr_on_datapoint("k8s.volume.type", "persistentVolumeClaim"),
            r#"HasAttrOnDatapoint("k8s.volume.type", "persistentVolumeClaim")"#
        );
    }

    #[test]
    fn test_join_with_or_is_parenthesised() {
        assert_eq!(join_with_or(&["a", "b", "c"]), "(a or b or c)");
        assert_eq!(join_with_or(&["a"]), "(a)");
    }

    #[test]
    fn test_join_with_and_is_bare() {
        assert_eq!(join_with_and(&["a", "b"]), "a and b");
        assert_eq!(join_with_and(&["a"]), "a");
    }

    #[test]
    fn test_not_does_not_rewrap() {
        assert_eq!(not("(a or b)"), "not(a or b)");
        assert_eq!(not("a == b"), "not(a == b)");
    }

    #[test]
    fn test_not_wraps_when_parens_are_not_enclosing() {
        assert_eq!(not("(a) or (b)"), "not((a) or (b))");
        assert_eq!(
            not(r#"IsMatch(x, "(a)")"#),
            r#"not(IsMatch(x, "(a)"))"#
        );
    }

    #[test]
    fn test_not_ignores_parens_inside_strings() {
        assert_eq!(not(r#"(x == ")(")"#), r#"not(x == ")(")"#);
    }

    #[test]
    fn test_attribute_nil_checks() {
        assert_eq!(
            resource_attribute_is_not_nil("k8s.volume.name"),
            r#"resource.attributes["k8s.volume.name"] != nil"#
        );
        assert_eq!(
            resource_attribute_not_equals("k8s.volume.type", "persistentVolumeClaim"),
            r#"resource.attributes["k8s.volume.type"] != "persistentVolumeClaim""#
        );
    }
}
