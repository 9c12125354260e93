//! 用户领域模型

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 账户状态，数据库中以 SMALLINT 存储
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Disabled,
    #[default]
    Active,
    /// 未验证
    Inactive,
}

impl UserStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            UserStatus::Disabled => 0,
            UserStatus::Active => 1,
            UserStatus::Inactive => 2,
        }
    }

    pub fn can_login(self) -> bool {
        self != UserStatus::Disabled
    }
}

impl TryFrom<i16> for UserStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UserStatus::Disabled),
            1 => Ok(UserStatus::Active),
            2 => Ok(UserStatus::Inactive),
            other => Err(format!("unknown user status {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Unknown,
    Male,
    Female,
}

impl Gender {
    pub fn as_i16(self) -> i16 {
        match self {
            Gender::Unknown => 0,
            Gender::Male => 1,
            Gender::Female => 2,
        }
    }
}

impl TryFrom<i16> for Gender {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Gender::Unknown),
            1 => Ok(Gender::Male),
            2 => Ok(Gender::Female),
            other => Err(format!("unknown gender {}", other)),
        }
    }
}

/// 用户账户
///
/// 不实现 `Serialize`，对外只暴露 [`UserResponse`] / [`UserBrief`]。
#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,

    // 资料
    pub nickname: String,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub gender: Gender,
    pub birthday: Option<NaiveDate>,

    pub status: UserStatus,
    pub role: Role,

    // 审计
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("status", &self.status)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: i16 = row.try_get("status")?;
        let gender: i16 = row.try_get("gender")?;
        let role: String = row.try_get("role")?;

        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            nickname: row.try_get("nickname")?,
            avatar: row.try_get("avatar")?,
            phone: row.try_get("phone")?,
            bio: row.try_get("bio")?,
            gender: Gender::try_from(gender).map_err(|e| sqlx::Error::Decode(e.into()))?,
            birthday: row.try_get("birthday")?,
            status: UserStatus::try_from(status).map_err(|e| sqlx::Error::Decode(e.into()))?,
            role: Role::parse(&role)
                .ok_or_else(|| sqlx::Error::Decode(format!("unknown role {}", role).into()))?,
            last_login_at: row.try_get("last_login_at")?,
            last_login_ip: row.try_get("last_login_ip")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// 新建账户所需字段（密码已哈希）
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
    pub status: UserStatus,
    pub role: Role,
}

/// 部分更新，`None` 表示不修改
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub gender: Option<Gender>,
    pub birthday: Option<NaiveDate>,
    pub status: Option<UserStatus>,
    pub role: Option<Role>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.nickname.is_none()
            && self.avatar.is_none()
            && self.phone.is_none()
            && self.bio.is_none()
            && self.gender.is_none()
            && self.birthday.is_none()
            && self.status.is_none()
            && self.role.is_none()
    }

    /// 应用到内存中的记录
    pub fn apply(&self, user: &mut User) {
        if let Some(v) = &self.username {
            user.username = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.nickname {
            user.nickname = v.clone();
        }
        if let Some(v) = &self.avatar {
            user.avatar = Some(v.clone());
        }
        if let Some(v) = &self.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = &self.bio {
            user.bio = Some(v.clone());
        }
        if let Some(v) = self.gender {
            user.gender = v;
        }
        if let Some(v) = self.birthday {
            user.birthday = Some(v);
        }
        if let Some(v) = self.status {
            user.status = v;
        }
        if let Some(v) = self.role {
            user.role = v;
        }
    }
}

/// 完整的对外账户视图（不含密码哈希）
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub gender: Gender,
    pub birthday: Option<NaiveDate>,
    pub status: UserStatus,
    pub role: Role,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            avatar: user.avatar.clone(),
            phone: user.phone.clone(),
            bio: user.bio.clone(),
            gender: user.gender,
            birthday: user.birthday,
            status: user.status,
            role: user.role,
            last_login_at: user.last_login_at,
            last_login_ip: user.last_login_ip.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse::from(&user)
    }
}

/// 公开的简要视图
#[derive(Debug, Clone, Serialize)]
pub struct UserBrief {
    pub id: Uuid,
    pub username: String,
    pub nickname: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserBrief {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            nickname: user.nickname.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

pub(crate) fn validate_username(value: &str) -> Result<(), ValidationError> {
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::new("alphanumeric")
            .with_message("username may only contain letters and digits".into()));
    }
    Ok(())
}

fn validate_birthday(value: &str) -> Result<(), ValidationError> {
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
        return Err(ValidationError::new("date_format")
            .with_message("birthday must be formatted as YYYY-MM-DD".into()));
    }
    Ok(())
}

fn parse_birthday(value: &Option<String>) -> Option<NaiveDate> {
    value
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 用户更新自己的资料
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 50))]
    pub nickname: Option<String>,
    #[validate(length(max = 255), url)]
    pub avatar: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[validate(range(min = 0, max = 2))]
    pub gender: Option<i16>,
    #[validate(custom(function = "validate_birthday"))]
    pub birthday: Option<String>,
}

impl UpdateProfileRequest {
    /// 转换为变更集，空字符串视为未提供
    pub fn into_changes(self) -> UserChanges {
        UserChanges {
            nickname: non_empty(&self.nickname),
            avatar: non_empty(&self.avatar),
            phone: non_empty(&self.phone),
            bio: non_empty(&self.bio),
            gender: self.gender.and_then(|g| Gender::try_from(g).ok()),
            birthday: parse_birthday(&self.birthday),
            ..Default::default()
        }
    }
}

/// 管理员更新用户
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(length(min = 3, max = 30), custom(function = "validate_username"))]
    pub username: Option<String>,
    #[validate(email, length(max = 100))]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub nickname: Option<String>,
    #[validate(length(max = 255), url)]
    pub avatar: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[validate(range(min = 0, max = 2))]
    pub gender: Option<i16>,
    #[validate(custom(function = "validate_birthday"))]
    pub birthday: Option<String>,
    #[validate(range(min = 0, max = 2))]
    pub status: Option<i16>,
    pub role: Option<Role>,
}

impl AdminUpdateUserRequest {
    pub fn into_changes(self) -> UserChanges {
        UserChanges {
            username: non_empty(&self.username),
            email: non_empty(&self.email),
            nickname: non_empty(&self.nickname),
            avatar: non_empty(&self.avatar),
            phone: non_empty(&self.phone),
            bio: non_empty(&self.bio),
            gender: self.gender.and_then(|g| Gender::try_from(g).ok()),
            birthday: parse_birthday(&self.birthday),
            status: self.status.and_then(|s| UserStatus::try_from(s).ok()),
            role: self.role,
        }
    }
}

/// 用户列表排序字段白名单
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Username,
    Email,
}

impl UserSortField {
    pub fn column(self) -> &'static str {
        match self {
            UserSortField::CreatedAt => "created_at",
            UserSortField::UpdatedAt => "updated_at",
            UserSortField::Username => "username",
            UserSortField::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// 用户列表查询参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub status: Option<i16>,
    pub role: Option<Role>,
    #[serde(default)]
    pub sort_by: UserSortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

/// 已归一化的过滤条件（传给存储层）
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub username: Option<String>,
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    pub role: Option<Role>,
    pub sort_by: UserSortField,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let contains = |haystack: &str, needle: &Option<String>| match needle {
            Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
            None => true,
        };
        contains(&user.username, &self.username)
            && contains(&user.email, &self.email)
            && self.status.map_or(true, |s| user.status == s)
            && self.role.map_or(true, |r| user.role == r)
    }
}

/// 分页结果
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            ((total.max(0) as u64 + page_size as u64 - 1) / page_size as u64) as u32
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}
