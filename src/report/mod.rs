pub mod aggregate;
pub mod sink;

pub use aggregate::{aggregate, filter_high_priority, ProposalReport};
pub use sink::{publish, ReportSink, StdoutSink, WebhookSink};
