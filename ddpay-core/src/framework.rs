use sqlx::PgPool;

/// Executes SQL queries against the pool.
///
/// Each query is a plain struct with a `kanau::processor::Processor` impl on
/// this type, see `entities::merchant_wallet`.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
