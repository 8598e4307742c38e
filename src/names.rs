//! Case-insensitive name matching shared by the exclusion scanner and the
//! process terminator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    pub name: String,
    pub mode: MatchMode,
}

impl NamePattern {
    pub fn exact(name: &str) -> Self {
        Self { name: name.to_lowercase(), mode: MatchMode::Exact }
    }

    pub fn substring(name: &str) -> Self {
        Self { name: name.to_lowercase(), mode: MatchMode::Substring }
    }

    /// `candidate` must already be lowercased.
    fn matches_lower(&self, candidate: &str) -> bool {
        match self.mode {
            MatchMode::Exact => candidate == self.name,
            MatchMode::Substring => candidate.contains(&self.name),
        }
    }
}

/// A canonical set of target names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    patterns: Vec<NamePattern>,
}

impl NameSet {
    pub fn new(patterns: Vec<NamePattern>) -> Self {
        let mut patterns = patterns;
        patterns.retain(|p| !p.name.is_empty());
        patterns.dedup();
        Self { patterns }
    }

    /// Every name is matched as "equals or contains", the rule used for
    /// running image names.
    pub fn substrings<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|n| NamePattern::substring(n.as_ref())).collect())
    }

    pub fn exacts<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|n| NamePattern::exact(n.as_ref())).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[NamePattern] {
        &self.patterns
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let lower = candidate.to_lowercase();
        self.patterns.iter().any(|p| p.matches_lower(&lower))
    }
}

/// Case-insensitive `contains`, used for one-off checks such as the
/// watcher's needle.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn ends_with_ignore_case(haystack: &str, suffix: &str) -> bool {
    haystack.to_lowercase().ends_with(&suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_mode_ignores_case_but_not_extra_text() {
        let set = NameSet::exacts(&["Zenith"]);
        assert!(set.matches("zenith"));
        assert!(set.matches("ZENITH"));
        assert!(!set.matches("zenith-old"));
    }

    #[test]
    fn substring_mode_accepts_equal_or_containing_names() {
        let set = NameSet::substrings(&["RobloxPlayerBeta.exe"]);
        assert!(set.matches("robloxplayerbeta.exe"));
        assert!(set.matches("RobloxPlayerBeta.exe (32 bit)"));
        assert!(!set.matches("RobloxStudio.exe"));
    }

    #[test]
    fn mixed_modes_and_empty_names() {
        let set = NameSet::new(vec![
            NamePattern::exact("a.exe"),
            NamePattern::substring("loader"),
            NamePattern::substring(""),
        ]);
        assert_eq!(set.patterns().len(), 2);
        assert!(set.matches("A.EXE"));
        assert!(set.matches("MyLoader.dll"));
        assert!(!set.matches("b.exe"));
    }

    #[test]
    fn helpers_fold_case() {
        assert!(contains_ignore_case("RobloxPlayerInstaller.EXE", "roblox"));
        assert!(ends_with_ignore_case("setup.EXE", ".exe"));
        assert!(!ends_with_ignore_case("setup.exe.part", ".exe"));
    }
}
