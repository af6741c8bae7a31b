// Application state module
// Owns one document store per configured resource

use super::types::{Config, ResponseStyle};
use crate::store::DocumentStore;

/// A served collection and how its responses are rendered
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub item_name: String,
    pub response_style: ResponseStyle,
    pub store: DocumentStore,
}

/// Application state, shared by every connection
pub struct AppState {
    pub config: Config,
    resources: Vec<Resource>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let resources = config
            .resources
            .iter()
            .map(|r| Resource {
                name: r.name.clone(),
                item_name: r.item_name.clone(),
                response_style: r.response_style,
                store: DocumentStore::new(r.file.clone(), r.store_options()),
            })
            .collect();

        Self { config, resources }
    }

    /// Look up a resource by its path segment
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }
}
