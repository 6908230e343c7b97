// Post listing shared by the feed, favorites and profile pages

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    db::models::{PostRow, UserRole},
    error::Result,
};

pub const PAGE_SIZE: i64 = 10;

/// Which posts a listing covers.
#[derive(Debug, Clone, Copy)]
pub enum PostScope<'a> {
    All { role: Option<UserRole> },
    Author(&'a str),
    FollowedBy(&'a str),
    Single(&'a str),
}

#[derive(Debug, Clone, Serialize)]
pub struct PostAuthor {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub city: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PostCounts {
    pub likes: i64,
    pub comments: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub content: String,
    pub images: Vec<String>,
    pub created_at: String,
    pub author_id: String,
    pub author: PostAuthor,
    pub is_liked: bool,
    #[serde(rename = "_count")]
    pub count: PostCounts,
}

impl From<PostRow> for PostView {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            images: row.images.0,
            created_at: row.created_at,
            author: PostAuthor {
                id: row.author_id.clone(),
                name: row.author_name,
                avatar: row.author_avatar,
                role: row.author_role,
                city: row.author_city,
            },
            author_id: row.author_id,
            is_liked: row.is_liked,
            count: PostCounts {
                likes: row.likes_count,
                comments: row.comments_count,
            },
        }
    }
}

fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, scope: PostScope<'_>) {
    match scope {
        PostScope::All { role: None } => {}
        PostScope::All { role: Some(role) } => {
            qb.push(" WHERE u.role = ").push_bind(role.as_str());
        }
        PostScope::Author(author_id) => {
            qb.push(" WHERE p.author_id = ").push_bind(author_id.to_string());
        }
        PostScope::FollowedBy(follower_id) => {
            qb.push(" WHERE p.author_id IN (SELECT following_id FROM follows WHERE follower_id = ")
                .push_bind(follower_id.to_string())
                .push(")");
        }
        PostScope::Single(post_id) => {
            qb.push(" WHERE p.id = ").push_bind(post_id.to_string());
        }
    }
}

/// Posts newest first, with aggregated counts and whether `viewer_id` liked each one.
pub async fn load_posts(
    pool: &SqlitePool,
    scope: PostScope<'_>,
    viewer_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<PostView>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT p.id, p.content, p.images, p.created_at, p.author_id,
               u.name AS author_name, u.avatar AS author_avatar, u.role AS author_role, u.city AS author_city,
               (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id) AS likes_count,
               (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count,
               EXISTS (SELECT 1 FROM post_likes pl WHERE pl.post_id = p.id AND pl.user_id = "#,
    );
    qb.push_bind(viewer_id.map(str::to_string));
    qb.push(") AS is_liked FROM posts p JOIN users u ON u.id = p.author_id");
    push_scope(&mut qb, scope);
    qb.push(" ORDER BY p.created_at DESC, p.rowid DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = qb.build_query_as::<PostRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(PostView::from).collect())
}

pub async fn count_posts(pool: &SqlitePool, scope: PostScope<'_>) -> Result<i64> {
    let mut qb =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts p JOIN users u ON u.id = p.author_id");
    push_scope(&mut qb, scope);

    let total = qb.build_query_scalar::<i64>().fetch_one(pool).await?;
    Ok(total)
}

pub async fn load_post(
    pool: &SqlitePool,
    post_id: &str,
    viewer_id: Option<&str>,
) -> Result<Option<PostView>> {
    let mut posts = load_posts(pool, PostScope::Single(post_id), viewer_id, 1, 0).await?;
    Ok(posts.pop())
}

/// Normalized 1-based page number and its row offset. Offsets beyond `i64`
/// saturate, which reads as past the end.
pub fn page_offset(page: Option<i64>) -> (i64, i64) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    (page, (page - 1).saturating_mul(PAGE_SIZE))
}

pub fn has_more(total: i64, page: i64) -> bool {
    total > page.saturating_mul(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_start_at_one() {
        assert_eq!(page_offset(None), (1, 0));
        assert_eq!(page_offset(Some(0)), (1, 0));
        assert_eq!(page_offset(Some(-4)), (1, 0));
        assert_eq!(page_offset(Some(3)), (3, 20));
    }

    #[test]
    fn has_more_only_when_rows_remain() {
        assert!(has_more(11, 1));
        assert!(!has_more(10, 1));
        assert!(!has_more(0, 1));
        assert!(!has_more(25, 3));
        assert!(!has_more(25, 7));
    }

    #[test]
    fn huge_pages_saturate_instead_of_overflowing() {
        let (page, offset) = page_offset(Some(i64::MAX));
        assert_eq!(page, i64::MAX);
        assert_eq!(offset, i64::MAX);
        assert!(!has_more(i64::MAX, page));
    }
}
