use std::fmt;

/// A single `name[=value]` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// The parameter name, lowercase.
    pub name: String,
    /// The parameter value, `None` for flags such as `lr`.
    pub value: Option<String>,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An ordered list of parameters with case-insensitive names.
///
/// Insertion order is kept for serialization, equality ignores it.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<Param>);

impl Params {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value of the parameter `name`.
    ///
    /// The outer `Option` tells whether the parameter exists, the inner one
    /// whether it has a value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_deref())
    }

    /// Returns the value of `name` when present with a value.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).flatten()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name`, replacing any previous value in place.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        let name = name.to_ascii_lowercase();
        let value = value.map(str::to_owned);
        match self.0.iter_mut().find(|p| p.name == name) {
            Some(param) => param.value = value,
            None => self.0.push(Param { name, value }),
        }
    }

    /// Removes `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Option<String>> {
        let pos = self.0.iter().position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(pos).value)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .all(|p| other.get(&p.name) == Some(p.value.as_deref()))
    }
}

impl Eq for Params {}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

impl<const N: usize> From<[(&str, Option<&str>); N]> for Params {
    fn from(params: [(&str, Option<&str>); N]) -> Self {
        let mut list = Params::new();
        for (name, value) in params {
            list.set(name, value);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut params = Params::from([("transport", Some("ws")), ("lr", None)]);
        params.set("Transport", Some("udp"));

        assert_eq!(params.to_string(), ";transport=udp;lr");
        assert_eq!(params.get("lr"), Some(None));
        assert_eq!(params.get("maddr"), None);
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = Params::from([("a", Some("1")), ("b", None)]);
        let b = Params::from([("b", None), ("a", Some("1"))]);
        let c = Params::from([("b", None), ("a", Some("2"))]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_remove() {
        let mut params = Params::from([("tag", Some("xyz"))]);

        assert_eq!(params.remove("TAG"), Some(Some("xyz".into())));
        assert!(params.is_empty());
        assert_eq!(params.remove("tag"), None);
    }
}
