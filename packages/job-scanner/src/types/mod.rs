pub mod job;
pub mod link;
pub mod report;
pub mod settings;
pub mod site;

pub use job::{clean_labels, Job, JobCandidate, JobOrigin, JobPage, JobQuery, JobStatus};
pub use link::{Link, LinkUpdate, NewLink};
pub use report::{
    LinkOutcome, LinkScanResult, LinkScanStatus, ScanFailure, ScanReport, ScanTarget, ScanTrigger,
};
pub use settings::{ScanSettings, MAX_CONCURRENCY};
pub use site::SiteId;
