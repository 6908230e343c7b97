pub mod admin;
pub mod ads;
pub mod auth;
pub mod chat;
pub mod comments;
pub mod feedback;
pub mod global_chat;
pub mod posts;
pub mod profile;
pub mod search;
pub mod shop;
pub mod uploads;
