use indexmap::IndexMap;
use serde::Serialize;

/// Text accumulated per `(category, key)`. Both levels keep first-append order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchedOutput {
    categories: IndexMap<String, IndexMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchedCategory {
    pub category: String,
    pub entries: Vec<(String, String)>,
}

impl BatchedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, category: &str, key: &str, text: &str) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push_str(text);
    }

    pub fn get(&self, category: &str, key: &str) -> Option<&str> {
        self.categories
            .get(category)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Drains everything, categories then keys in insertion order.
    pub fn flush(&mut self) -> Vec<BatchedCategory> {
        std::mem::take(&mut self.categories)
            .into_iter()
            .map(|(category, entries)| BatchedCategory {
                category,
                entries: entries.into_iter().collect(),
            })
            .collect()
    }
}
