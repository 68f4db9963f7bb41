pub mod articles;
pub mod comments;
pub mod community;
pub mod images;
pub mod photos;
pub mod users;
pub mod votes;
