use crate::config::RouteConfig;
use std::collections::HashMap;

/// Where records of one entity type are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub collection: String,
    pub conflict_key: String,
}

impl Target {
    pub fn new(collection: impl Into<String>, conflict_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            conflict_key: conflict_key.into(),
        }
    }
}

const BUILT_IN_ROUTES: [(&str, &str, &str); 4] = [
    ("legal_deposits", "legal_deposits", "request_number"),
    ("users", "profiles", "user_id"),
    ("catalog_metadata", "catalog_metadata", "source_record_id"),
    ("manuscripts", "manuscripts", "inventory_number"),
];

/// Maps logical entity types to their storage collection and conflict key.
#[derive(Debug, Clone)]
pub struct TargetRouter {
    routes: HashMap<String, Target>,
}

impl Default for TargetRouter {
    fn default() -> Self {
        let routes = BUILT_IN_ROUTES
            .iter()
            .map(|(entity, collection, key)| (entity.to_string(), Target::new(*collection, *key)))
            .collect();
        Self { routes }
    }
}

impl TargetRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in routes plus `extra`; an extra route overrides a built-in one
    /// with the same entity type.
    pub fn with_routes(extra: &[RouteConfig]) -> Self {
        extra.iter().fold(Self::default(), |router, route| {
            router.with_route(&route.entity_type, Target::new(&route.collection, &route.conflict_key))
        })
    }

    pub fn with_route(mut self, entity_type: &str, target: Target) -> Self {
        self.routes.insert(entity_type.to_string(), target);
        self
    }

    pub fn resolve(&self, entity_type: &str) -> Option<&Target> {
        self.routes.get(entity_type)
    }

    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
