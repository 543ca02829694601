pub mod deadline;
pub mod duration;
pub mod settings;

/// The two scrape endpoints. Decides the collection mode and which
/// parameters are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEndpoint {
    /// Enumerate resources per subscription, then fetch each one.
    List,
    /// Fetch an explicit list of resource ids within one subscription.
    Resource,
}

impl ProbeEndpoint {
    pub const fn path(self) -> &'static str {
        match self {
            Self::List => "/probe/metrics/list",
            Self::Resource => "/probe/metrics/resource",
        }
    }
}
