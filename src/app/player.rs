//! Demo payload carried by the `produce`, `consume` and `demo` commands

use crate::queue::{Gzip, Json};
use serde::{Deserialize, Serialize};

/// Players travel as gzip-compressed JSON
pub type PlayerPayload = Gzip<Json<Player>>;

/// Player login record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub access_token: String,
    pub refresh_token: String,
    pub head_img_url: String,
    pub user_id: i64,
    pub user_ip: String,
    pub nick_name: String,
    pub expires_in: i64,
    pub last_login_time: i64,
}

impl Player {
    /// The `index`-th synthetic player, logged in now
    pub fn robot(index: u64) -> Self {
        Self {
            access_token: "5876dd81-bb6e-5972-9b5a-832333d5b0ee".to_string(),
            refresh_token: "4fe2c2d0-bfb7-500d-9cf6-f5c4f4bcaabb".to_string(),
            head_img_url: "https://example.com/avatar.png".to_string(),
            user_id: 131198216,
            user_ip: "127.0.0.1".to_string(),
            nick_name: format!("robot_{}", index),
            expires_in: 14400,
            last_login_time: chrono::Utc::now().timestamp(),
        }
    }

    pub fn into_payload(self) -> PlayerPayload {
        Gzip(Json(self))
    }
}
