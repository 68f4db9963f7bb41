use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub username: String,
    pub avatar_index: i64,
    pub tags: Vec<String>,
    pub intro: Option<String>,
    pub interested_topics: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub public_id: String,
    pub url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub sub_title: Option<String>,
    pub cover_image: Option<String>,
    pub content: String,
    pub topic_tags: Vec<String>,
    pub views: i64,
    pub likes: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPost {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub topic_tags: Vec<String>,
    pub is_edit: bool,
    pub views: i64,
    pub likes: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPost {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub geometry: Option<String>,
    pub is_edit: bool,
    pub views: i64,
    pub likes: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOption {
    pub id: String,
    pub vote_id: String,
    pub text: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVote {
    pub id: String,
    pub user_id: String,
    pub vote_id: String,
    pub vote_option_id: String,
    pub created_at: String,
}

/// Parse a JSON-encoded string array column; bad data degrades to empty.
pub fn tags_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}
