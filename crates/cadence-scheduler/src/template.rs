//! Minimal `{{variable}}` template evaluation for notification subjects and bodies.
//!
//! `{{ $sys.taskName }}` is replaced by the bound value. An unclosed `{{` is a
//! syntax error. In strict mode an unbound variable is an error, otherwise it
//! renders as an empty string.

use std::collections::BTreeMap;

use crate::error::NotifyError;

pub fn render(template: &str, vars: &BTreeMap<String, String>, strict: bool) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| NotifyError::Render(format!("unclosed '{{{{' at offset {}", template.len() - rest.len() + open)))?;
        let name = after_open[..close].trim();
        if name.is_empty() {
            return Err(NotifyError::Render("empty variable reference".into()));
        }
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None if strict => return Err(NotifyError::Render(format!("unbound variable '{name}'"))),
            None => {}
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("$sys.taskName".to_string(), "run_command".to_string());
        vars.insert("$sys.completed".to_string(), "true".to_string());
        vars
    }

    #[test]
    fn test_interpolation() {
        let out = render("Task {{$sys.taskName}} done: {{ $sys.completed }}", &vars(), true).unwrap();
        assert_eq!(out, "Task run_command done: true");
    }

    #[test]
    fn test_plain_text_and_single_braces_pass_through() {
        assert_eq!(render("no vars {here}", &vars(), true).unwrap(), "no vars {here}");
    }

    #[test]
    fn test_unbound_variable() {
        assert!(matches!(render("{{$missing}}", &vars(), true), Err(NotifyError::Render(_))));
        assert_eq!(render("a{{$missing}}b", &vars(), false).unwrap(), "ab");
    }

    #[test]
    fn test_malformed() {
        assert!(render("oops {{$sys.taskName", &vars(), false).is_err());
        assert!(render("{{  }}", &vars(), false).is_err());
    }
}
