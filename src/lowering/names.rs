use std::collections::HashMap;

/// Operand aliasing for ops that forward their input unchanged.
///
/// Targets are resolved before they are stored, so a lookup never follows a
/// chain.
#[derive(Debug, Default, Clone)]
pub struct NameResolver {
    aliases: HashMap<String, String>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Make `from` refer to whatever `to` currently resolves to.
    pub fn alias(&mut self, from: &str, to: &str) {
        let target = self.resolve(to).to_string();
        self.aliases.insert(from.to_string(), target);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
