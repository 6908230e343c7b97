use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum UserRole {
    Client,
    Master,
    Shop,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Client => "CLIENT",
            UserRole::Master => "MASTER",
            UserRole::Shop => "SHOP",
            UserRole::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CLIENT" => Some(UserRole::Client),
            "MASTER" => Some(UserRole::Master),
            "SHOP" => Some(UserRole::Shop),
            "ADMIN" => Some(UserRole::Admin),
            _ => None,
        }
    }

    /// Roles a visitor may pick at registration.
    pub fn is_self_registrable(self) -> bool {
        !matches!(self, UserRole::Admin)
    }

    /// Follow edges are only allowed from clients or masters towards masters.
    pub fn can_follow(self, target: UserRole) -> bool {
        matches!(
            (self, target),
            (UserRole::Client, UserRole::Master) | (UserRole::Master, UserRole::Master)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    ExteriorFinish,
    AutoService,
    Electrical,
    Plumbing,
    InteriorFinish,
    Construction,
    Landscaping,
    Cleaning,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    BuildingMaterials,
    AutoParts,
    Household,
    Tools,
    Plumbing,
    Electrical,
    Paint,
    Garden,
    Other,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub city: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub description: Option<String>,
    pub social_links: Option<Json<serde_json::Value>>,
    pub rating: f64,
    pub is_setup_complete: bool,
    pub has_delivery: bool,
    pub ready_to_travel: bool,
    pub service_area: Option<Json<serde_json::Value>>,
    pub address: Option<String>,
    pub working_hours: Option<String>,
    pub created_at: String,
}

impl User {
    pub fn details(&self) -> RoleDetails {
        match self.role {
            UserRole::Client => RoleDetails::Client,
            UserRole::Master => RoleDetails::Master {
                is_setup_complete: self.is_setup_complete,
                ready_to_travel: self.ready_to_travel,
                service_area: self.service_area.as_ref().map(|area| area.0.clone()),
            },
            UserRole::Shop => RoleDetails::Shop {
                is_setup_complete: self.is_setup_complete,
                has_delivery: self.has_delivery,
                address: self.address.clone(),
                working_hours: self.working_hours.clone(),
            },
            UserRole::Admin => RoleDetails::Admin,
        }
    }
}

/// Role-specific part of a profile. Storage keeps one flat row per user;
/// the API only ever exposes the fields that belong to the user's role.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "role", rename_all = "UPPERCASE")]
pub enum RoleDetails {
    Client,
    #[serde(rename_all = "camelCase")]
    Master {
        is_setup_complete: bool,
        ready_to_travel: bool,
        service_area: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Shop {
        is_setup_complete: bool,
        has_delivery: bool,
        address: Option<String>,
        working_hours: Option<String>,
    },
    Admin,
}

/// Public view of a user embedded in posts, messages and listings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub city: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostRow {
    pub id: String,
    pub content: String,
    pub images: Json<Vec<String>>,
    pub created_at: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub author_role: UserRole,
    pub author_city: String,
    pub likes_count: i64,
    pub comments_count: i64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub master_id: String,
    pub category: ServiceCategory,
    pub specialization_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub shop_id: String,
    pub name: String,
    pub image: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<ProductCategory>,
    pub available: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub id: String,
    pub position: i64,
    pub image: Option<String>,
    pub link: Option<String>,
    pub images: Json<Vec<String>>,
    pub links: Json<Vec<String>>,
    pub active: bool,
    pub mobile_only: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub sender_role: UserRole,
    pub sender_city: String,
    pub sender_first_name: Option<String>,
    pub sender_last_name: Option<String>,
}

impl MessageRow {
    pub fn sender(&self) -> UserSummary {
        UserSummary {
            id: self.sender_id.clone(),
            name: self.sender_name.clone(),
            avatar: self.sender_avatar.clone(),
            role: self.sender_role,
            city: self.sender_city.clone(),
            first_name: self.sender_first_name.clone(),
            last_name: self.sender_last_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_rule_only_targets_masters() {
        use UserRole::*;
        assert!(Client.can_follow(Master));
        assert!(Master.can_follow(Master));

        for (from, to) in [
            (Master, Client),
            (Client, Client),
            (Client, Shop),
            (Shop, Master),
            (Admin, Master),
            (Master, Shop),
        ] {
            assert!(!from.can_follow(to), "{from:?} -> {to:?} should be rejected");
        }
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(UserRole::parse("master"), Some(UserRole::Master));
        assert_eq!(UserRole::parse(" SHOP "), Some(UserRole::Shop));
        assert_eq!(UserRole::parse("owner"), None);
        assert!(!UserRole::Admin.is_self_registrable());
    }

    #[test]
    fn role_details_serialize_with_role_tag() {
        let details = RoleDetails::Master {
            is_setup_complete: true,
            ready_to_travel: false,
            service_area: None,
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["role"], "MASTER");
        assert_eq!(value["isSetupComplete"], true);
        assert!(value.get("hasDelivery").is_none());

        let value = serde_json::to_value(RoleDetails::Client).unwrap();
        assert_eq!(value, serde_json::json!({ "role": "CLIENT" }));
    }
}
