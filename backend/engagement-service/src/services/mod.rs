pub mod engagement;
pub mod feed;
pub mod notifications;
pub mod posts;
pub mod profiles;

pub use engagement::EngagementEngine;
pub use feed::{project, project_post};
pub use notifications::{ApplicationAggregator, ApplicationOrdering};
pub use posts::PostService;
pub use profiles::ProfileService;
