//! Descriptor execution.
//!
//! # Responsibility
//! - Generate SQL for derived and criteria descriptors.
//! - Bind template and raw descriptors as written.
//! - Map rows to managed entities, projections or scalars.
//!
//! # Invariants
//! - Pending unit-of-work writes are flushed before every statement.
//! - `execute_update` clears the identity map after running, whether the
//!   statement succeeded or not.
//! - Fetch directives apply to generated queries; template queries fetch by
//!   selecting `fetch_<relation>_<column>` aliases themselves.

use crate::model::entity::{Entity, EntityId, EntityMeta};
use crate::projection::{map_row, Projection, ProjectionShape};
use crate::query::criteria::{Criteria, Predicate};
use crate::query::derived::DerivedQuery;
use crate::query::page::{resolve_total, Page, PageRequest};
use crate::query::row::ResultRow;
use crate::query::template::{RawQuery, TemplateQuery};
use crate::query::{BoundQuery, QueryParams, QueryValue};
use crate::repo::error::{RepoError, RepoResult};
use crate::session::UnitOfWork;
use log::{debug, info};
use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::time::Instant;

/// What to run.
#[derive(Debug, Clone, Copy)]
pub enum QueryDescriptor<'q> {
    Derived {
        query: &'q DerivedQuery,
        args: &'q [QueryValue],
    },
    Template {
        query: &'q TemplateQuery,
        params: &'q QueryParams,
    },
    Criteria(&'q Criteria),
    Raw {
        query: &'q RawQuery,
        args: &'q [Value],
    },
}

impl QueryDescriptor<'_> {
    fn label(&self) -> &str {
        match self {
            Self::Derived { query, .. } => query.method(),
            Self::Template { query, .. } => query.sql(),
            Self::Criteria(_) => "criteria",
            Self::Raw { query, .. } => query.sql(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Derived { .. } => "derived",
            Self::Template { .. } => "template",
            Self::Criteria(_) => "criteria",
            Self::Raw { .. } => "raw",
        }
    }
}

/// Loading hints for entity results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Relations joined and loaded together with the root entity.
    pub fetch: &'static [&'static str],
    /// Loaded entities are managed but never flushed.
    pub read_only: bool,
}

impl QueryOptions {
    pub const fn fetching(relations: &'static [&'static str]) -> Self {
        Self {
            fetch: relations,
            read_only: false,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            fetch: &[],
            read_only: true,
        }
    }
}

#[derive(Clone, Copy)]
enum Select {
    Entity(&'static [&'static str]),
    Projection(&'static ProjectionShape),
    Ids,
    Count,
}

enum Resolved {
    Generated(Criteria),
    Text {
        bound: BoundQuery,
        count: Option<BoundQuery>,
    },
}

fn resolve(descriptor: &QueryDescriptor<'_>) -> RepoResult<Resolved> {
    Ok(match descriptor {
        QueryDescriptor::Derived { query, args } => Resolved::Generated(query.bind(args)?),
        QueryDescriptor::Criteria(criteria) => Resolved::Generated((*criteria).clone()),
        QueryDescriptor::Template { query, params } => Resolved::Text {
            bound: query.bind(params)?,
            count: query.bind_count(params)?,
        },
        QueryDescriptor::Raw { query, args } => Resolved::Text {
            bound: query.bind(args)?,
            count: query.bind_count(args)?,
        },
    })
}

pub fn find_entities<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    options: QueryOptions,
) -> RepoResult<Vec<E>> {
    let rows = fetch_rows(uow, descriptor, E::meta(), Select::Entity(options.fetch))?;
    materialize(uow, &rows, options.read_only)
}

/// At most one entity; more than one matching row is `NonUniqueResult`.
pub fn find_single<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    options: QueryOptions,
) -> RepoResult<Option<E>> {
    let rows = fetch_rows(uow, descriptor, E::meta(), Select::Entity(options.fetch))?;
    if rows.len() > 1 {
        return Err(RepoError::NonUniqueResult {
            query: descriptor.label().to_string(),
            count: rows.len(),
        });
    }
    Ok(materialize(uow, &rows, options.read_only)?.into_iter().next())
}

pub fn find_page<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    request: &PageRequest,
    options: QueryOptions,
) -> RepoResult<Page<E>> {
    let meta = E::meta();
    let (rows, total) = fetch_page_rows(
        uow,
        descriptor,
        meta,
        Select::Entity(options.fetch),
        request,
        |property| meta.field(property).map(|field| field.column),
    )?;
    let content = materialize(uow, &rows, options.read_only)?;
    Ok(Page::new(content, request, total))
}

pub fn find_projections<E: Entity, P: Projection>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
) -> RepoResult<Vec<P>> {
    let rows = fetch_rows(uow, descriptor, E::meta(), Select::Projection(P::shape()))?;
    rows.iter().map(map_row::<P>).collect()
}

pub fn find_projection_page<E: Entity, P: Projection>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    request: &PageRequest,
) -> RepoResult<Page<P>> {
    let (rows, total) = fetch_page_rows(
        uow,
        descriptor,
        E::meta(),
        Select::Projection(P::shape()),
        request,
        |_| None,
    )?;
    let content = rows.iter().map(map_row::<P>).collect::<RepoResult<Vec<_>>>()?;
    Ok(Page::new(content, request, total))
}

/// First column of every row.
pub fn find_scalars<T: FromSql>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
) -> RepoResult<Vec<T>> {
    let context = descriptor.label().to_string();
    let Resolved::Text { bound, .. } = resolve(descriptor)? else {
        return Err(RepoError::invalid_query(
            context,
            "scalar results need a template or raw query",
        ));
    };
    uow.flush()?;
    let started_at = Instant::now();
    let rows = query_rows(uow.connection()?, &bound)?;
    log_query(descriptor, rows.len(), started_at);
    rows.iter()
        .map(|row| {
            let value = row.first().ok_or_else(|| {
                RepoError::InvalidData(format!("`{context}` returned no columns"))
            })?;
            T::column_result(ValueRef::from(value))
                .map_err(|err| RepoError::InvalidData(format!("`{context}`: {err}")))
        })
        .collect()
}

pub fn count<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
) -> RepoResult<u64> {
    let context = descriptor.label().to_string();
    let bound = match resolve(descriptor)? {
        Resolved::Generated(criteria) => {
            generated_sql(E::meta(), &criteria, Select::Count, None, &context)?
        }
        Resolved::Text { bound, count } => count.unwrap_or_else(|| wrap_count(&bound)),
    };
    uow.flush()?;
    count_rows(uow.connection()?, &bound)
}

/// Runs a bulk mutation and returns the affected row count.
///
/// Pending writes are flushed first; the identity map is cleared afterwards
/// because the statement bypassed it.
pub fn execute_update(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
) -> RepoResult<usize> {
    let context = descriptor.label().to_string();
    let Resolved::Text { bound, .. } = resolve(descriptor)? else {
        return Err(RepoError::invalid_query(
            context,
            "bulk updates need a template or raw query",
        ));
    };
    uow.flush()?;
    let started_at = Instant::now();
    let result = uow
        .write_connection()
        .and_then(|conn| {
            conn.execute(&bound.sql, params_from_iter(bound.binds.iter()))
                .map_err(RepoError::from)
        });
    uow.clear();
    let changed = result?;
    info!(
        "event=bulk_update module=query status=ok kind={} rows={changed} duration_ms={}",
        descriptor.kind(),
        started_at.elapsed().as_millis()
    );
    Ok(changed)
}

/// Ids matching `criteria`. Reads outside any transaction while the unit
/// of work is still idle, so a following row lock can start one fresh.
pub(crate) fn find_ids<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    criteria: &Criteria,
) -> RepoResult<Vec<EntityId>> {
    let meta = E::meta();
    let bound = generated_sql(meta, criteria, Select::Ids, None, "criteria")?;
    uow.flush()?;
    let conn = if uow.is_active() {
        uow.connection()?
    } else {
        uow.raw_connection()
    };
    query_rows(conn, &bound)?
        .iter()
        .map(|row| row.get_i64(meta.id_column))
        .collect()
}

/// Re-reads one row inside the transaction and replaces the managed copy.
pub(crate) fn reload<E: Entity>(uow: &mut UnitOfWork<'_>, id: EntityId) -> RepoResult<Option<E>> {
    let meta = E::meta();
    let criteria = Criteria::matching(Predicate::eq("id", id));
    let bound = generated_sql(meta, &criteria, Select::Entity(&[]), None, "reload")?;
    let rows = query_rows(uow.connection()?, &bound)?;
    match rows.first() {
        Some(row) => uow.refresh(E::from_row(row)?).map(Some),
        None => Ok(None),
    }
}

fn fetch_rows(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    meta: &'static EntityMeta,
    select: Select,
) -> RepoResult<Vec<ResultRow>> {
    let bound = match resolve(descriptor)? {
        Resolved::Generated(criteria) => {
            generated_sql(meta, &criteria, select, None, descriptor.label())?
        }
        Resolved::Text { bound, .. } => bound,
    };
    uow.flush()?;
    let started_at = Instant::now();
    let rows = query_rows(uow.connection()?, &bound)?;
    log_query(descriptor, rows.len(), started_at);
    Ok(rows)
}

fn fetch_page_rows(
    uow: &mut UnitOfWork<'_>,
    descriptor: &QueryDescriptor<'_>,
    meta: &'static EntityMeta,
    select: Select,
    request: &PageRequest,
    rename: impl Fn(&str) -> Option<&'static str>,
) -> RepoResult<(Vec<ResultRow>, u64)> {
    let context = descriptor.label();
    let (paged, count) = match resolve(descriptor)? {
        Resolved::Generated(criteria) => (
            generated_sql(meta, &criteria, select, Some(request), context)?,
            generated_sql(meta, &criteria, Select::Count, None, context)?,
        ),
        Resolved::Text { bound, count } => {
            let order = request.sort().to_native_sql(context, rename)?;
            let count = count.unwrap_or_else(|| wrap_count(&bound));
            (wrap_page(bound, &order, request), count)
        }
    };
    uow.flush()?;
    let started_at = Instant::now();
    let conn = uow.connection()?;
    let rows = query_rows(conn, &paged)?;
    let total = resolve_total(request, rows.len(), || count_rows(conn, &count))?;
    log_query(descriptor, rows.len(), started_at);
    Ok((rows, total))
}

fn materialize<E: Entity>(
    uow: &mut UnitOfWork<'_>,
    rows: &[ResultRow],
    read_only: bool,
) -> RepoResult<Vec<E>> {
    rows.iter()
        .map(|row| {
            let entity = E::from_row(row)?;
            uow.attach_loaded(entity, read_only)
        })
        .collect()
}

fn generated_sql(
    meta: &'static EntityMeta,
    criteria: &Criteria,
    select: Select,
    page: Option<&PageRequest>,
    context: &str,
) -> RepoResult<BoundQuery> {
    let mut joins = Vec::new();
    let columns = match select {
        Select::Entity(fetch) => {
            let mut columns: Vec<String> = meta
                .fields
                .iter()
                .map(|field| format!("{} AS {}", meta.qualified(field.column), field.column))
                .collect();
            for relation in fetch {
                let relation = meta.require_relation(relation, context)?;
                columns.push(relation.fetch_columns());
                joins.push(relation.join_sql(meta));
            }
            columns.join(", ")
        }
        Select::Projection(shape) => {
            for relation in shape.relations() {
                joins.push(meta.require_relation(relation, context)?.join_sql(meta));
            }
            shape.select_sql(meta, context)?
        }
        Select::Ids => format!("{} AS {}", meta.qualified(meta.id_column), meta.id_column),
        Select::Count => "1".to_string(),
    };

    let mut binds = Vec::new();
    let predicate = criteria.predicate.to_sql(meta, context, &mut binds)?;
    let mut sql = format!("SELECT {columns} FROM {} {}", meta.table, meta.alias);
    for join in &joins {
        sql.push(' ');
        sql.push_str(join);
    }
    sql.push_str(" WHERE ");
    sql.push_str(&predicate);

    if let Select::Count = select {
        let sql = match criteria.limit {
            Some(limit) => format!("SELECT COUNT(*) FROM ({sql} LIMIT {limit}) AS limited"),
            None => format!("SELECT COUNT(*) FROM ({sql}) AS counted"),
        };
        return Ok(BoundQuery::new(sql, binds));
    }

    let sort = match page {
        Some(request) => criteria.sort.clone().and(request.sort().clone()),
        None => criteria.sort.clone(),
    };
    sql.push(' ');
    sql.push_str(&sort.to_entity_sql(meta, context)?);

    match (page, criteria.limit) {
        (Some(request), limit) => {
            let offset = request.offset();
            let take = match limit {
                Some(limit) => request.size().min(limit.saturating_sub(offset)),
                None => request.size(),
            };
            sql.push_str(" LIMIT ? OFFSET ?");
            binds.push(Value::Integer(to_i64(take)));
            binds.push(Value::Integer(to_i64(offset)));
        }
        (None, Some(limit)) => {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Integer(to_i64(limit)));
        }
        (None, None) => {}
    }
    Ok(BoundQuery::new(sql, binds))
}

fn wrap_page(bound: BoundQuery, order: &str, request: &PageRequest) -> BoundQuery {
    let BoundQuery { sql, mut binds } = bound;
    binds.push(Value::Integer(to_i64(request.size())));
    binds.push(Value::Integer(to_i64(request.offset())));
    BoundQuery::new(
        format!("SELECT * FROM ({sql}) AS paged {order} LIMIT ? OFFSET ?"),
        binds,
    )
}

fn wrap_count(bound: &BoundQuery) -> BoundQuery {
    BoundQuery::new(
        format!("SELECT COUNT(*) FROM ({}) AS counted", bound.sql),
        bound.binds.clone(),
    )
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn query_rows(conn: &Connection, bound: &BoundQuery) -> RepoResult<Vec<ResultRow>> {
    let mut stmt = conn.prepare(&bound.sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params_from_iter(bound.binds.iter()), |row| {
        ResultRow::read(row, &names)
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(RepoError::from)
}

fn count_rows(conn: &Connection, bound: &BoundQuery) -> RepoResult<u64> {
    let total: i64 = conn.query_row(&bound.sql, params_from_iter(bound.binds.iter()), |row| {
        row.get(0)
    })?;
    u64::try_from(total).map_err(|_| RepoError::InvalidData(format!("negative count {total}")))
}

fn log_query(descriptor: &QueryDescriptor<'_>, rows: usize, started_at: Instant) {
    debug!(
        "event=query_execute module=query status=ok kind={} rows={rows} duration_ms={}",
        descriptor.kind(),
        started_at.elapsed().as_millis()
    );
}
