//! Tenant scope resolution
//!
//! Every store takes an explicit [`Scope`]; nothing reads tenant or role from
//! ambient state. [`ScopedQuery`] is the one place the tenant predicate is
//! written, so restricted and unrestricted callers share a single query path.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteArguments;
use sqlx::{QueryBuilder, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Caller role. Only [`Role::SuperAdmin`] may act across tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn is_unrestricted(self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "viewer" => Ok(Role::Viewer),
            other => Err(Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// Identity of the party making a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub tenant_id: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn new(tenant_id: Option<String>, role: Role) -> Self {
        Self { tenant_id, role }
    }
}

/// Tenant-visibility boundary of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    tenant_id: Option<String>,
    unrestricted: bool,
}

/// Derive the access scope for a caller
///
/// Fails with [`Error::TenantRequired`] when the caller has no tenant and no
/// unrestricted role. An unrestricted caller that names a tenant is narrowed
/// to that tenant.
pub fn resolve(caller: &Caller) -> Result<Scope> {
    let tenant_id = caller
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    match (tenant_id, caller.role.is_unrestricted()) {
        (Some(tenant), unrestricted) => Ok(Scope {
            tenant_id: Some(tenant),
            unrestricted,
        }),
        (None, true) => Ok(Scope::unrestricted()),
        (None, false) => Err(Error::TenantRequired),
    }
}

impl Scope {
    /// Scope restricted to a single tenant
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            unrestricted: false,
        }
    }

    /// Scope spanning all tenants
    pub fn unrestricted() -> Self {
        Self {
            tenant_id: None,
            unrestricted: true,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    /// Tenant to filter on, or `None` to operate across all tenants
    pub fn filter_tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Narrow to an explicit tenant
    ///
    /// Unrestricted scopes may narrow to any tenant. A restricted scope may
    /// only "narrow" to its own tenant; anything else looks like a miss.
    pub fn with_tenant(&self, tenant_id: &str) -> Result<Scope> {
        if self.unrestricted || self.permits(tenant_id) {
            Ok(Scope {
                tenant_id: Some(tenant_id.to_string()),
                unrestricted: self.unrestricted,
            })
        } else {
            Err(Error::NotFoundOrAccessDenied(format!("tenant {}", tenant_id)))
        }
    }

    /// True when rows owned by `tenant_id` are visible in this scope
    pub fn permits(&self, tenant_id: &str) -> bool {
        match &self.tenant_id {
            Some(own) => own == tenant_id,
            None => self.unrestricted,
        }
    }

    /// Tenant to stamp on a newly created row
    pub fn tenant_for_write(&self, requested: Option<&str>) -> Result<String> {
        match (requested, &self.tenant_id) {
            (Some(req), _) if self.unrestricted => Ok(req.to_string()),
            (Some(req), Some(own)) if req == own => Ok(own.clone()),
            (Some(req), _) => Err(Error::NotFoundOrAccessDenied(format!("tenant {}", req))),
            (None, Some(own)) => Ok(own.clone()),
            (None, None) => Err(Error::TenantRequired),
        }
    }
}

/// Query builder that applies the tenant predicate of a [`Scope`]
///
/// ```rust,ignore
/// let mut q = ScopedQuery::new(&scope, "SELECT id FROM alerts", "tenant_id");
/// q.and_eq("asset_sensor_id", asset_sensor_id.to_string());
/// q.push(" ORDER BY alert_time DESC");
/// let rows = q.build().fetch_all(&pool).await?;
/// ```
pub struct ScopedQuery<'a> {
    builder: QueryBuilder<'a, Sqlite>,
}

impl<'a> ScopedQuery<'a> {
    /// Start a query; `base_sql` must not contain a WHERE clause
    pub fn new(scope: &Scope, base_sql: &str, tenant_column: &str) -> Self {
        let mut builder = QueryBuilder::new(base_sql);
        builder.push(" WHERE 1 = 1");
        if let Some(tenant) = scope.filter_tenant() {
            builder.push(format!(" AND {} = ", tenant_column));
            builder.push_bind(tenant.to_string());
        }
        Self { builder }
    }

    /// Append `AND column = value`
    pub fn and_eq<T>(&mut self, column: &str, value: T) -> &mut Self
    where
        T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
    {
        self.builder.push(format!(" AND {} = ", column));
        self.builder.push_bind(value);
        self
    }

    /// Append a literal predicate (`AND <predicate>`) with no bound values
    pub fn and_raw(&mut self, predicate: &str) -> &mut Self {
        self.builder.push(" AND ");
        self.builder.push(predicate);
        self
    }

    /// Append raw SQL (ORDER BY, LIMIT, ...)
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.builder.push(sql);
        self
    }

    /// Append a bound value
    pub fn push_bind<T>(&mut self, value: T) -> &mut Self
    where
        T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
    {
        self.builder.push_bind(value);
        self
    }

    /// SQL text built so far
    pub fn sql(&self) -> &str {
        self.builder.sql()
    }

    pub fn build(&mut self) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'a>> {
        self.builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tenant_member() {
        let scope = resolve(&Caller::new(Some("t1".into()), Role::Operator)).unwrap();
        assert_eq!(scope.filter_tenant(), Some("t1"));
        assert!(!scope.is_unrestricted());
    }

    #[test]
    fn test_resolve_requires_tenant_for_restricted_roles() {
        for role in [Role::Admin, Role::Operator, Role::Viewer] {
            let result = resolve(&Caller::new(None, role));
            assert!(matches!(result, Err(Error::TenantRequired)), "role {}", role);
        }
        let blank = resolve(&Caller::new(Some("  ".into()), Role::Admin));
        assert!(matches!(blank, Err(Error::TenantRequired)));
    }

    #[test]
    fn test_resolve_super_admin_spans_all_tenants() {
        let scope = resolve(&Caller::new(None, Role::SuperAdmin)).unwrap();
        assert!(scope.is_unrestricted());
        assert_eq!(scope.filter_tenant(), None);
        assert!(scope.permits("anyone"));

        let narrowed = resolve(&Caller::new(Some("t9".into()), Role::SuperAdmin)).unwrap();
        assert!(narrowed.is_unrestricted());
        assert_eq!(narrowed.filter_tenant(), Some("t9"));
    }

    #[test]
    fn test_with_tenant() {
        let restricted = Scope::tenant("a");
        assert!(restricted.with_tenant("a").is_ok());
        assert!(matches!(
            restricted.with_tenant("b"),
            Err(Error::NotFoundOrAccessDenied(_))
        ));

        let narrowed = Scope::unrestricted().with_tenant("b").unwrap();
        assert_eq!(narrowed.filter_tenant(), Some("b"));
    }

    #[test]
    fn test_tenant_for_write() {
        let restricted = Scope::tenant("a");
        assert_eq!(restricted.tenant_for_write(None).unwrap(), "a");
        assert_eq!(restricted.tenant_for_write(Some("a")).unwrap(), "a");
        assert!(matches!(
            restricted.tenant_for_write(Some("b")),
            Err(Error::NotFoundOrAccessDenied(_))
        ));

        let global = Scope::unrestricted();
        assert!(matches!(global.tenant_for_write(None), Err(Error::TenantRequired)));
        assert_eq!(global.tenant_for_write(Some("b")).unwrap(), "b");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("SuperAdmin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!("super-admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_scoped_query_adds_tenant_predicate_once() {
        let mut q = ScopedQuery::new(&Scope::tenant("a"), "SELECT id FROM alerts", "tenant_id");
        q.and_eq("id", "x".to_string());
        assert_eq!(
            q.sql(),
            "SELECT id FROM alerts WHERE 1 = 1 AND tenant_id = ? AND id = ?"
        );

        let mut all = ScopedQuery::new(&Scope::unrestricted(), "SELECT id FROM alerts", "tenant_id");
        all.and_raw("resolved = 0");
        assert_eq!(all.sql(), "SELECT id FROM alerts WHERE 1 = 1 AND resolved = 0");
    }
}
