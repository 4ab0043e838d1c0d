/// The routing decision made for a stream before its filters run.
pub trait Route: Send + Sync {
    /// Name of the matched route entry.
    fn name(&self) -> &str;

    /// Upstream cluster the stream will be forwarded to.
    fn cluster_name(&self) -> &str;
}
