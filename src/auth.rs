//! Session and page/element permission checks.
//!
//! These checks only decide what the front end shows. They are not a security
//! boundary and they never gate data access in the store.

use chrono::{DateTime, Duration, Utc};
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Grants everything in a permission list.
pub const ALL: &str = "all";
pub const LOGIN_PAGE: &str = "login.html";
/// Pages any signed-in user may open.
pub const ALWAYS_ALLOWED_PAGES: [&str; 3] = ["index.html", "profile.html", "settings.html"];
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub pages: Vec<String>,
    pub elements: Vec<String>,
}

impl Permissions {
    fn grants(list: &[String], item: &str) -> bool {
        list.iter().any(|entry| entry == ALL || entry == item)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u32,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: u32,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Permissions,
    pub timestamp: DateTime<Utc>,
    pub remember_me: bool,
}

pub trait UserRepository {
    /// `login` matches either the email or the phone number.
    fn find_user(&self, login: &str, role: &str) -> Option<User>;
}

/// Fixed user list handed in at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticUserRepository {
    users: Vec<User>,
}

impl StaticUserRepository {
    pub fn new(users: Vec<User>) -> Self {
        StaticUserRepository { users }
    }

    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(source)?))
    }
}

impl UserRepository for StaticUserRepository {
    fn find_user(&self, login: &str, role: &str) -> Option<User> {
        self.users
            .iter()
            .find(|user| (user.email == login || user.phone == login) && user.role == role)
            .cloned()
    }
}

/// Where the current session lives between page loads.
pub trait SessionStore {
    fn load(&self) -> Option<Session>;
    fn save(&self, session: &Session);
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Session> {
        self.slot.lock().clone()
    }

    fn save(&self, session: &Session) {
        *self.slot.lock() = Some(session.clone());
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }
}

/// Checks credentials and role, then records a fresh session.
pub fn login(
    users: &dyn UserRepository,
    sessions: &dyn SessionStore,
    login: &str,
    password: &str,
    role: &str,
    remember_me: bool,
    now: DateTime<Utc>,
) -> Option<Session> {
    let user = users.find_user(login, role).filter(|user| user.password == password)?;
    let session = Session {
        user_id: user.id,
        email: user.email,
        name: user.name,
        role: user.role,
        permissions: user.permissions,
        timestamp: now,
        remember_me,
    };
    sessions.save(&session);
    info!("Signed in {} as {}", session.email, session.role);
    Some(session)
}

pub fn logout(sessions: &dyn SessionStore) {
    sessions.clear();
}

pub fn current_session(sessions: &dyn SessionStore) -> Option<Session> {
    sessions.load()
}

pub fn is_session_valid(session: &Session, now: DateTime<Utc>) -> bool {
    (now - session.timestamp).abs() < Duration::hours(SESSION_TTL_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Page(&'a str),
    /// A protected element, by DOM id.
    Element(&'a str),
}

/// Pure allow/deny decision. Pass only a session already checked with
/// [`is_session_valid`].
pub fn is_allowed(session: Option<&Session>, resource: Resource<'_>) -> bool {
    match resource {
        Resource::Page(LOGIN_PAGE) => true,
        Resource::Page(page) => session.is_some_and(|session| {
            ALWAYS_ALLOWED_PAGES.contains(&page) || Permissions::grants(&session.permissions.pages, page)
        }),
        Resource::Element(id) => {
            session.is_some_and(|session| Permissions::grants(&session.permissions.elements, id))
        }
    }
}
