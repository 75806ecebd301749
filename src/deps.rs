//! Dependency declarations for the installation recipe.
//!
//! The list is fixed: this crate installs one application, it does not
//! resolve arbitrary dependency graphs. Each entry records whether it is
//! needed at build time or at runtime, who provides it, and an optional
//! minimum version.

use std::fmt;

use semver::{Comparator, Op, Prerelease, Version, VersionReq};

/// When a dependency is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Build,
    Runtime,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Build => f.pad("build"),
            Role::Runtime => f.pad("runtime"),
        }
    }
}

/// Who puts a dependency in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// The surrounding packaging system (formula `depends_on`).
    System,
    /// pip, inside the isolated environment.
    Environment,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::System => f.pad("system"),
            Provider::Environment => f.pad("environment"),
        }
    }
}

/// A semantic-version range.
///
/// Two-component versions such as `3.12` are accepted wherever a version is
/// matched, so Python-style release numbers work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    req: VersionReq,
}

impl VersionConstraint {
    pub fn parse(text: &str) -> Result<Self, semver::Error> {
        Ok(Self {
            req: VersionReq::parse(text)?,
        })
    }

    /// `>=major.minor.patch`
    pub fn at_least(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            req: VersionReq {
                comparators: vec![Comparator {
                    op: Op::GreaterEq,
                    major,
                    minor: Some(minor),
                    patch: Some(patch),
                    pre: Prerelease::EMPTY,
                }],
            },
        }
    }

    /// Whether `version` satisfies the range. Unparseable versions never do.
    pub fn matches(&self, version: &str) -> bool {
        lenient_version(version)
            .map(|v| self.req.matches(&v))
            .unwrap_or(false)
    }

    /// Render as a pip (PEP 440) specifier, e.g. `>=3.3.1` or `>=1.2,<2`.
    pub fn to_pip(&self) -> String {
        self.req
            .comparators
            .iter()
            .map(pip_clause)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.req)
    }
}

fn lenient_version(text: &str) -> Option<Version> {
    let text = text.trim();
    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }
    let padded = match text.split('.').count() {
        1 => format!("{text}.0.0"),
        2 => format!("{text}.0"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

fn comparator_version(c: &Comparator) -> String {
    let mut out = c.major.to_string();
    if let Some(minor) = c.minor {
        out.push_str(&format!(".{minor}"));
        if let Some(patch) = c.patch {
            out.push_str(&format!(".{patch}"));
            if !c.pre.is_empty() {
                out.push_str(&format!("-{}", c.pre));
            }
        }
    }
    out
}

fn caret_upper_bound(c: &Comparator) -> String {
    match (c.major, c.minor, c.patch) {
        (0, Some(0), Some(patch)) => format!("0.0.{}", patch + 1),
        (0, Some(minor), _) => format!("0.{}", minor + 1),
        (0, None, _) => "1".to_string(),
        (major, _, _) => (major + 1).to_string(),
    }
}

fn pip_clause(c: &Comparator) -> String {
    let version = comparator_version(c);
    match c.op {
        Op::Exact => format!("=={version}"),
        Op::Greater => format!(">{version}"),
        Op::GreaterEq => format!(">={version}"),
        Op::Less => format!("<{version}"),
        Op::LessEq => format!("<={version}"),
        Op::Tilde if c.minor.is_some() && c.patch.is_some() => format!("~={version}"),
        Op::Tilde => match c.minor {
            Some(minor) => format!(">={version},<{}.{}", c.major, minor + 1),
            None => format!(">={version},<{}", c.major + 1),
        },
        Op::Caret => format!(">={version},<{}", caret_upper_bound(c)),
        Op::Wildcard => format!("=={version}.*"),
        _ => format!(">={version}"),
    }
}

/// One declared requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: &'static str,
    pub role: Role,
    pub provider: Provider,
    pub constraint: Option<VersionConstraint>,
    /// Python module the dependency makes importable, if any.
    pub import: Option<&'static str>,
}

impl DependencySpec {
    fn new(name: &'static str, role: Role, provider: Provider) -> Self {
        Self {
            name,
            role,
            provider,
            constraint: None,
            import: None,
        }
    }

    fn at_least(mut self, major: u64, minor: u64, patch: u64) -> Self {
        self.constraint = Some(VersionConstraint::at_least(major, minor, patch));
        self
    }

    fn imports(mut self, module: &'static str) -> Self {
        self.import = Some(module);
        self
    }

    /// Requirement string handed to pip, e.g. `pathvalidate>=3.3.1`.
    pub fn requirement(&self) -> String {
        match &self.constraint {
            Some(constraint) => format!("{}{}", self.name, constraint.to_pip()),
            None => self.name.to_string(),
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<14} {:<8} {:<12}", self.name, self.role, self.provider)?;
        if let Some(constraint) = &self.constraint {
            write!(f, " {constraint}")?;
        }
        Ok(())
    }
}

/// GObject-introspection namespaces and the versions selected before import.
pub const GI_NAMESPACES: &[(&str, Option<&str>)] = &[
    ("Gtk", Some("4.0")),
    ("Adw", Some("1")),
    ("Gio", None),
    ("GLib", None),
    ("GObject", None),
    ("Pango", None),
];

/// The fixed dependency list.
pub fn declared() -> Vec<DependencySpec> {
    vec![
        DependencySpec::new("meson", Role::Build, Provider::System),
        DependencySpec::new("ninja", Role::Build, Provider::System),
        DependencySpec::new("pkgconf", Role::Build, Provider::System),
        DependencySpec::new("gtk4", Role::Runtime, Provider::System),
        DependencySpec::new("libadwaita", Role::Runtime, Provider::System),
        DependencySpec::new("pygobject3", Role::Runtime, Provider::System).imports("gi"),
        DependencySpec::new("python@3.12", Role::Runtime, Provider::System),
        DependencySpec::new("pathvalidate", Role::Runtime, Provider::Environment)
            .at_least(3, 3, 1)
            .imports("pathvalidate"),
    ]
}

/// Runtime dependencies pip installs into the isolated environment.
pub fn environment_packages(deps: &[DependencySpec]) -> Vec<DependencySpec> {
    deps.iter()
        .filter(|d| d.role == Role::Runtime && d.provider == Provider::Environment)
        .cloned()
        .collect()
}

/// Python modules every runtime dependency must make importable.
pub fn runtime_modules(deps: &[DependencySpec]) -> Vec<&'static str> {
    deps.iter()
        .filter(|d| d.role == Role::Runtime)
        .filter_map(|d| d.import)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_least_matches_lenient_versions() {
        let c = VersionConstraint::at_least(3, 3, 1);
        assert!(c.matches("3.3.1"));
        assert!(c.matches("3.4"));
        assert!(c.matches("4"));
        assert!(!c.matches("3.3.0"));
        assert!(!c.matches("3.2"));
        assert!(!c.matches("not-a-version"));
    }

    #[test]
    fn test_parse_range_matches() {
        let c = VersionConstraint::parse(">=3.12, <3.13").unwrap();
        assert!(c.matches("3.12"));
        assert!(c.matches("3.12.7"));
        assert!(!c.matches("3.13.0"));
        assert!(VersionConstraint::parse(">>3").is_err());
    }

    #[test]
    fn test_to_pip_rendering() {
        assert_eq!(VersionConstraint::at_least(3, 3, 1).to_pip(), ">=3.3.1");
        assert_eq!(
            VersionConstraint::parse(">=1.2, <2").unwrap().to_pip(),
            ">=1.2,<2"
        );
        assert_eq!(
            VersionConstraint::parse("^1.4.2").unwrap().to_pip(),
            ">=1.4.2,<2"
        );
        assert_eq!(
            VersionConstraint::parse("^0.2.3").unwrap().to_pip(),
            ">=0.2.3,<0.3"
        );
        assert_eq!(
            VersionConstraint::parse("^0.0.3").unwrap().to_pip(),
            ">=0.0.3,<0.0.4"
        );
        assert_eq!(VersionConstraint::parse("~1.2.3").unwrap().to_pip(), "~=1.2.3");
        assert_eq!(VersionConstraint::parse("~1.2").unwrap().to_pip(), ">=1.2,<1.3");
        assert_eq!(VersionConstraint::parse("=2.0.0").unwrap().to_pip(), "==2.0.0");
        assert_eq!(VersionConstraint::parse("1.2.*").unwrap().to_pip(), "==1.2.*");
    }

    #[test]
    fn test_requirement_string() {
        let deps = declared();
        let pathvalidate = deps.iter().find(|d| d.name == "pathvalidate").unwrap();
        assert_eq!(pathvalidate.requirement(), "pathvalidate>=3.3.1");

        let meson = deps.iter().find(|d| d.name == "meson").unwrap();
        assert_eq!(meson.requirement(), "meson");
    }

    #[test]
    fn test_environment_packages_only_pip_runtime() {
        let packages = environment_packages(&declared());
        let names: Vec<_> = packages.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["pathvalidate"]);
    }

    #[test]
    fn test_runtime_modules_include_gi() {
        let modules = runtime_modules(&declared());
        assert_eq!(modules, vec!["gi", "pathvalidate"]);
    }

    #[test]
    fn test_gi_versions_selected_for_toolkit() {
        let versions: Vec<_> = GI_NAMESPACES
            .iter()
            .filter_map(|(ns, v)| v.map(|v| (*ns, v)))
            .collect();
        assert_eq!(versions, vec![("Gtk", "4.0"), ("Adw", "1")]);
    }

    #[test]
    fn test_role_and_provider_display() {
        assert_eq!(Role::Build.to_string(), "build");
        assert_eq!(Role::Runtime.to_string(), "runtime");
        assert_eq!(Provider::System.to_string(), "system");
        assert_eq!(Provider::Environment.to_string(), "environment");
    }
}
