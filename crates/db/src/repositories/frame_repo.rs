//! Backing tables holding workflow data.
//!
//! Each workflow owns one table named `__ONTASK_WORKFLOW_TABLE_<id>` with one
//! column per workflow column plus `__ontask_row_id`, which keeps the frame's
//! row order. Filters arrive as compiled [`Predicate`]s and are pushed into
//! the `WHERE` clause with positional parameters.

use chrono::Utc;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, Postgres, Row as _};
use ontask_core::error::CoreError;
use ontask_core::formula::predicate::{quote_ident, Predicate};
use ontask_core::frame::{FrameColumn, TypedFrame};
use ontask_core::types::{DbId, TimeZone};
use ontask_core::value::{Cell, DataType, Value};

/// Internal row identity column.
pub const ROW_ID_COLUMN: &str = "__ontask_row_id";

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_PARAMS_PER_INSERT: usize = 60_000;

pub fn table_name(workflow_id: DbId) -> String {
    format!("__ONTASK_WORKFLOW_TABLE_{workflow_id}")
}

/// Which rows to read and in what order.
#[derive(Debug, Clone, Default)]
pub struct FrameQuery<'a> {
    pub filter: Option<&'a Predicate>,
    /// Case-insensitive substring searched in these columns, rendered as
    /// [`Value::render`] shows them.
    pub search: Option<(&'a str, &'a [FrameColumn])>,
    /// Column and ascending flag; rows keep insertion order otherwise.
    pub order_by: Option<(&'a str, bool)>,
}

pub struct FrameRepo;

impl FrameRepo {
    /// Drop and recreate the backing table with the frame's contents.
    pub async fn replace(conn: &mut PgConnection, workflow_id: DbId, frame: &TypedFrame) -> Result<(), sqlx::Error> {
        let table = quote_ident(&table_name(workflow_id));
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *conn)
            .await?;

        let mut definitions = vec![format!("{} BIGSERIAL PRIMARY KEY", quote_ident(ROW_ID_COLUMN))];
        definitions.extend(
            frame
                .columns()
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type.sql_type())),
        );
        sqlx::query(&format!("CREATE TABLE {table} ({})", definitions.join(", ")))
            .execute(&mut *conn)
            .await?;

        let ncols = frame.ncols();
        if ncols == 0 || frame.nrows() == 0 {
            return Ok(());
        }
        let names = frame
            .columns()
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_batch = (MAX_PARAMS_PER_INSERT / ncols).max(1);

        for batch in frame.raw_rows().chunks(rows_per_batch) {
            let mut sql = format!("INSERT INTO {table} ({names}) VALUES ");
            let mut n = 0;
            for (r, _) in batch.iter().enumerate() {
                if r > 0 {
                    sql.push_str(", ");
                }
                let placeholders = (0..ncols)
                    .map(|_| {
                        n += 1;
                        format!("${n}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push('(');
                sql.push_str(&placeholders);
                sql.push(')');
            }

            let mut query = sqlx::query(&sql);
            for row in batch {
                for (cell, column) in row.iter().zip(frame.columns()) {
                    query = bind_cell(query, cell, column.data_type);
                }
            }
            query.execute(&mut *conn).await?;
        }

        tracing::debug!(workflow_id, nrows = frame.nrows(), ncols, "Backing table rewritten");
        Ok(())
    }

    pub async fn drop_table(conn: &mut PgConnection, workflow_id: DbId) -> Result<(), sqlx::Error> {
        let table = quote_ident(&table_name(workflow_id));
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Every row of the table, in insertion order.
    pub async fn load(
        conn: &mut PgConnection,
        workflow_id: DbId,
        columns: &[FrameColumn],
        tz: &TimeZone,
    ) -> Result<TypedFrame, sqlx::Error> {
        Self::select(conn, workflow_id, columns, &FrameQuery::default(), tz).await
    }

    /// Project `columns` from the rows matching `query`.
    pub async fn select(
        conn: &mut PgConnection,
        workflow_id: DbId,
        columns: &[FrameColumn],
        query: &FrameQuery<'_>,
        tz: &TimeZone,
    ) -> Result<TypedFrame, sqlx::Error> {
        if columns.is_empty() {
            return Ok(TypedFrame::default());
        }
        let projection = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let (clause, params) = where_clause(query, tz);
        let order = match query.order_by {
            Some((column, ascending)) => format!(
                "{} {} NULLS LAST, {}",
                quote_ident(column),
                if ascending { "ASC" } else { "DESC" },
                quote_ident(ROW_ID_COLUMN)
            ),
            None => quote_ident(ROW_ID_COLUMN),
        };
        let sql = format!(
            "SELECT {projection} FROM {} {clause} ORDER BY {order}",
            quote_ident(&table_name(workflow_id))
        );

        let mut q = sqlx::query(&sql);
        for param in &params {
            q = bind_value(q, param);
        }
        let rows = q.fetch_all(&mut *conn).await?;

        let cells = rows
            .iter()
            .map(|row| decode_row(row, columns, tz))
            .collect::<Result<Vec<_>, _>>()?;
        TypedFrame::from_rows(columns.to_vec(), cells).map_err(decode_error)
    }

    /// Number of rows matching `filter`.
    pub async fn count(
        conn: &mut PgConnection,
        workflow_id: DbId,
        filter: Option<&Predicate>,
    ) -> Result<i64, sqlx::Error> {
        let query = FrameQuery {
            filter,
            ..FrameQuery::default()
        };
        // without a search the zone is never read
        let (clause, params) = where_clause(&query, &ontask_core::types::utc());
        let sql = format!(
            "SELECT COUNT(*) FROM {} {clause}",
            quote_ident(&table_name(workflow_id))
        );
        let mut q = sqlx::query(&sql);
        for param in &params {
            q = bind_value(q, param);
        }
        let row = q.fetch_one(&mut *conn).await?;
        row.try_get(0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `WHERE` clause for a filter and a text search, with its parameters.
fn where_clause(query: &FrameQuery<'_>, tz: &TimeZone) -> (String, Vec<Value>) {
    let mut parts = Vec::new();
    let mut params = Vec::new();

    if let Some(predicate) = query.filter {
        let fragment = predicate.to_sql_from(1);
        parts.push(fragment.sql);
        params.extend(fragment.params);
    }

    if let Some((text, columns)) = query.search {
        if !text.is_empty() && !columns.is_empty() {
            params.push(Value::String(format!("%{}%", escape_like(text))));
            let placeholder = format!("${}", params.len());
            let tests = columns
                .iter()
                .map(|c| format!("{} ILIKE {placeholder} ESCAPE '\\'", search_text(c, tz)))
                .collect::<Vec<_>>()
                .join(" OR ");
            parts.push(format!("({tests})"));
        }
    }

    if parts.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", parts.join(" AND ")), params)
    }
}

/// SQL text of a column in the same form as the in-memory search sees it.
fn search_text(column: &FrameColumn, tz: &TimeZone) -> String {
    let c = quote_ident(&column.name);
    match column.data_type {
        DataType::String => c,
        DataType::Integer => format!("CAST({c} AS TEXT)"),
        // integral doubles keep one decimal
        DataType::Double => format!(
            "(CASE WHEN {c} = trunc({c}) AND abs({c}) < 1e16 \
             THEN CAST(CAST({c} AS NUMERIC(20, 1)) AS TEXT) ELSE CAST({c} AS TEXT) END)"
        ),
        DataType::Boolean => format!("(CASE WHEN {c} THEN 'True' ELSE 'False' END)"),
        DataType::Datetime => format!(
            "(to_char({c} AT TIME ZONE INTERVAL '{} seconds', 'YYYY-MM-DD HH24:MI:SS') || '{}')",
            tz.local_minus_utc(),
            Utc::now().with_timezone(tz).format("%:z")
        ),
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn bind_value<'q>(query: Query<'q, Postgres, PgArguments>, value: &Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Integer(i) => query.bind(*i),
        Value::Double(d) => query.bind(*d),
        Value::Boolean(b) => query.bind(*b),
        Value::Datetime(dt) => query.bind(dt.with_timezone(&Utc)),
    }
}

/// Bind a cell as the SQL type of its column, so nulls are typed too.
fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &Cell,
    data_type: DataType,
) -> Query<'q, Postgres, PgArguments> {
    match (cell, data_type) {
        (Some(Value::Integer(i)), DataType::Double) => query.bind(*i as f64),
        (Some(value), _) => bind_value(query, value),
        (None, DataType::String) => query.bind(None::<String>),
        (None, DataType::Integer) => query.bind(None::<i64>),
        (None, DataType::Double) => query.bind(None::<f64>),
        (None, DataType::Boolean) => query.bind(None::<bool>),
        (None, DataType::Datetime) => query.bind(None::<chrono::DateTime<Utc>>),
    }
}

fn decode_row(row: &PgRow, columns: &[FrameColumn], tz: &TimeZone) -> Result<Vec<Cell>, sqlx::Error> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            Ok(match column.data_type {
                DataType::String => row.try_get::<Option<String>, _>(i)?.map(Value::String),
                DataType::Integer => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
                DataType::Double => row.try_get::<Option<f64>, _>(i)?.map(Value::Double),
                DataType::Boolean => row.try_get::<Option<bool>, _>(i)?.map(Value::Boolean),
                DataType::Datetime => row
                    .try_get::<Option<chrono::DateTime<Utc>>, _>(i)?
                    .map(|dt| Value::Datetime(dt.with_timezone(tz))),
            })
        })
        .collect()
}

fn decode_error(e: CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}
