use regex::Regex;

#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pattern: Regex,
}

impl Rule {
    // The locator is capture group 1.
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Rule {
            name,
            pattern: Regex::new(pattern).expect("extraction rule pattern is valid"),
        }
    }

    pub fn capture<'h>(&self, haystack: &'h str) -> Option<&'h str> {
        self.pattern
            .captures(haystack)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<'h> {
    pub rule: &'static str,
    pub value: &'h str,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleSet { rules }
    }

    pub fn first_match<'h>(&self, haystack: &'h str) -> Option<RuleMatch<'h>> {
        self.rules.iter().find_map(|rule| {
            rule.capture(haystack).map(|value| RuleMatch {
                rule: rule.name,
                value,
            })
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name).collect()
    }
}
