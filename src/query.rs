use url::form_urlencoded;

/// Decoded view over a page's query string.
///
/// A parameter counts as present when `name=` appears in the query, even
/// with an empty value. A bare `name` with no `=` is absent. When a name
/// repeats, the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReader {
    pairs: Vec<(String, String)>,
}

impl QueryReader {
    pub fn new(query: Option<&str>) -> Self {
        let query = query.unwrap_or("").trim_start_matches('?');
        let pairs = query
            .split('&')
            .filter(|segment| segment.contains('='))
            .flat_map(|segment| form_urlencoded::parse(segment.as_bytes()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value for writing: absent reads as the empty string
    pub fn value_or_empty(&self, name: &str) -> String {
        self.get(name).unwrap_or("").to_string()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn any_present<'a>(&self, mut names: impl Iterator<Item = &'a str>) -> bool {
        names.any(|name| self.contains(name))
    }
}
