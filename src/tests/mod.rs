// Tests module
// Support: fakes for discovery, geo lookup and cache stores
// Collector: end-to-end poll loop scenarios (enrichment, failures, stop)

pub mod support;
