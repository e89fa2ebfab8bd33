pub mod models;
pub mod normalize;
pub mod profile;
pub mod views;

pub use models::{
    Application, ApplicationResult, Comment, Identity, LikeState, NewPost, Post, PostId, Role,
    UserId,
};
pub use profile::{
    Education, Experience, ProfileUpdate, RegisterProfile, SocialLinks, UserProfile,
};
pub use views::{ApplicationView, ViewPost};
