//! Maps logical operation names ("parse-prd", "expand-task", …) to a preferred provider.

/// Lowercase and drop everything that is not alphanumeric, so that
/// "Parse PRD", "parse_prd" and "parse-prd" compare equal.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct Route {
    operation: String,
    normalized: String,
    provider: String,
}

/// Built once at startup from "provider X handles operations [a, b, c]" entries.
#[derive(Debug, Clone, Default)]
pub struct OperationRouter {
    routes: Vec<Route>,
    default_provider: Option<String>,
}

impl OperationRouter {
    pub fn new(default_provider: Option<String>) -> Self {
        Self {
            routes: Vec::new(),
            default_provider,
        }
    }

    /// Build from `(provider, operations)` pairs. Earlier pairs win on conflicts.
    pub fn from_routes<I, S>(routes: I, default_provider: Option<String>) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut router = Self::new(default_provider);
        for (provider, operations) in routes {
            let provider = provider.into();
            for op in operations {
                router.add_route(&provider, &op);
            }
        }
        router
    }

    /// Register `operation` as handled by `provider`. Blank and duplicate
    /// operation names are ignored; the first registration wins.
    pub fn add_route(&mut self, provider: &str, operation: &str) {
        let normalized = normalize(operation);
        if normalized.is_empty() {
            return;
        }
        if let Some(existing) = self.routes.iter().find(|r| r.normalized == normalized) {
            if existing.provider != provider {
                tracing::warn!(
                    operation,
                    kept = %existing.provider,
                    ignored = provider,
                    "operation routed to more than one provider"
                );
            }
            return;
        }
        self.routes.push(Route {
            operation: operation.trim().to_string(),
            normalized,
            provider: provider.to_string(),
        });
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Provider explicitly mapped to `operation`, without falling back to the default.
    ///
    /// Exact (normalized) match first, then the first route whose name contains
    /// or is contained in the operation name. Substring matching can pick a
    /// surprising route when names overlap; exact names are always preferred.
    pub fn route_for(&self, operation: &str) -> Option<&str> {
        let wanted = normalize(operation);
        if wanted.is_empty() {
            return None;
        }

        if let Some(route) = self.routes.iter().find(|r| r.normalized == wanted) {
            return Some(&route.provider);
        }

        let fuzzy = self
            .routes
            .iter()
            .find(|r| wanted.contains(&r.normalized) || r.normalized.contains(&wanted))?;
        tracing::debug!(
            operation,
            matched = %fuzzy.operation,
            provider = %fuzzy.provider,
            "fuzzy operation route"
        );
        Some(&fuzzy.provider)
    }

    /// Provider for `operation`, falling back to the process-wide default.
    pub fn provider_for_operation(&self, operation: &str) -> Option<&str> {
        self.route_for(operation).or(self.default_provider())
    }

    /// Operations routed to `provider`, in registration order.
    pub fn operations_for(&self, provider: &str) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|r| r.provider == provider)
            .map(|r| r.operation.as_str())
            .collect()
    }
}
