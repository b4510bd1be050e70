//! Minimal `{{.Var}}` template rendering over a closed variable set.
//!
//! Install-command and registry-asset templates may reference exactly
//! `{{.Package}} {{.Version}} {{.BinPath}} {{.Name}} {{.Args}} {{.Asset}}
//! {{.OS}} {{.Arch}}`. Anything else fails closed rather than rendering to
//! an empty string.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown template variable {{{{.{0}}}}}")]
    UnknownVariable(String),

    #[error("template variable {{{{.{0}}}}} is not available in this context")]
    Unavailable(String),

    #[error("unterminated template expression at byte {0}")]
    Unterminated(usize),

    #[error("malformed template expression {0:?}")]
    Malformed(String),
}

/// Variable bindings for one render. Unset variables are rejected when
/// referenced, so each call site binds exactly what its context defines.
#[derive(Debug, Default, Clone)]
pub struct Vars {
    package: Option<String>,
    version: Option<String>,
    bin_path: Option<String>,
    name: Option<String>,
    args: Option<String>,
    asset: Option<String>,
    os: Option<String>,
    arch: Option<String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(mut self, v: impl Into<String>) -> Self {
        self.package = Some(v.into());
        self
    }

    pub fn version(mut self, v: impl Into<String>) -> Self {
        self.version = Some(v.into());
        self
    }

    pub fn bin_path(mut self, v: impl Into<String>) -> Self {
        self.bin_path = Some(v.into());
        self
    }

    pub fn name(mut self, v: impl Into<String>) -> Self {
        self.name = Some(v.into());
        self
    }

    pub fn args(mut self, v: impl Into<String>) -> Self {
        self.args = Some(v.into());
        self
    }

    pub fn asset(mut self, v: impl Into<String>) -> Self {
        self.asset = Some(v.into());
        self
    }

    pub fn os(mut self, v: impl Into<String>) -> Self {
        self.os = Some(v.into());
        self
    }

    pub fn arch(mut self, v: impl Into<String>) -> Self {
        self.arch = Some(v.into());
        self
    }

    fn lookup(&self, key: &str) -> Result<&str, TemplateError> {
        let slot = match key {
            "Package" => &self.package,
            "Version" => &self.version,
            "BinPath" => &self.bin_path,
            "Name" => &self.name,
            "Args" => &self.args,
            "Asset" => &self.asset,
            "OS" => &self.os,
            "Arch" => &self.arch,
            other => return Err(TemplateError::UnknownVariable(other.to_string())),
        };
        slot.as_deref()
            .ok_or_else(|| TemplateError::Unavailable(key.to_string()))
    }
}

/// Renders `template`, substituting each `{{.Var}}` from `vars`.
pub fn render(template: &str, vars: &Vars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(TemplateError::Unterminated(template.len() - rest.len() + start))?;
        let expr = after[..end].trim();
        let key = expr
            .strip_prefix('.')
            .ok_or_else(|| TemplateError::Malformed(expr.to_string()))?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TemplateError::Malformed(expr.to_string()));
        }
        out.push_str(vars.lookup(key)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_variables() {
        let vars = Vars::new().version("1.2.3").os("darwin").arch("arm64");
        let out = render("tool-{{.Version}}-{{.OS}}-{{.Arch}}.tar.gz", &vars).unwrap();
        assert_eq!(out, "tool-1.2.3-darwin-arm64.tar.gz");
    }

    #[test]
    fn tolerates_spaces_inside_braces() {
        let vars = Vars::new().name("rg");
        assert_eq!(render("{{ .Name }}", &vars).unwrap(), "rg");
    }

    #[test]
    fn unknown_variable_fails_closed() {
        let err = render("{{.Platform}}", &Vars::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownVariable(k) if k == "Platform"));
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let err = render("{{.Version}}", &Vars::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Unavailable(k) if k == "Version"));
    }

    #[test]
    fn unterminated_expression_is_an_error() {
        assert!(matches!(
            render("{{.Version", &Vars::new()),
            Err(TemplateError::Unterminated(_))
        ));
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(render("no variables", &Vars::new()).unwrap(), "no variables");
    }
}
