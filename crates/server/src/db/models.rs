use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of values stored as upper-case text columns.
macro_rules! choice_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

choice_enum!(ProjectType {
    Backend => "BACKEND",
    Frontend => "FRONTEND",
    Ios => "IOS",
    Android => "ANDROID",
});

choice_enum!(ContributorRole {
    Author => "AUTHOR",
    Contributor => "CONTRIBUTOR",
});

choice_enum!(Priority {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

choice_enum!(Tag {
    Bug => "BUG",
    Feature => "FEATURE",
    Task => "TASK",
});

choice_enum!(Status {
    Todo => "TODO",
    InProgress => "IN_PROGRESS",
    Finished => "FINISHED",
});

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub age: i64,
    pub can_be_contacted: bool,
    pub can_data_be_shared: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub project_type: String,
    pub author_id: String,
    pub author_username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contributor {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub tag: String,
    pub status: String,
    pub project_id: String,
    pub author_id: String,
    pub author_username: String,
    pub assignee_id: Option<String>,
    pub assignee_username: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub issue_id: String,
    pub project_id: String,
    pub author_id: String,
    pub author_username: String,
    pub description: String,
    pub created_at: String,
}

/// Compact user reference embedded in other representations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRef {
    pub id: String,
    pub username: String,
}

impl UserRef {
    pub fn new(id: String, username: String) -> Self {
        Self { id, username }
    }
}
