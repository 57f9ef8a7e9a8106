use crate::entities::ChainName;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// Row of the `merchant_wallets` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MerchantWalletRecord {
    pub id: i64,
    pub merchant_id: i64,
    pub chain: ChainName,
    pub address: String,
    pub derivation_path: String,
    pub created_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone)]
/// Look up the wallet of a merchant on one chain.
pub struct GetMerchantWallet {
    pub merchant_id: u32,
    pub chain: ChainName,
}

impl Processor<GetMerchantWallet> for DatabaseProcessor {
    type Output = Option<MerchantWalletRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMerchantWallet")]
    async fn process(
        &self,
        query: GetMerchantWallet,
    ) -> Result<Option<MerchantWalletRecord>, sqlx::Error> {
        sqlx::query_as::<_, MerchantWalletRecord>(
            r#"
            SELECT id, merchant_id, chain, address, derivation_path, created_at
            FROM merchant_wallets
            WHERE merchant_id = $1 AND chain = $2
            "#,
        )
        .bind(i64::from(query.merchant_id))
        .bind(query.chain)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Insert a merchant wallet, or return the existing row for the same
/// (merchant, chain).
///
/// The no-op `DO UPDATE` makes `RETURNING` yield the surviving row when a
/// concurrent first use already inserted it.
pub struct UpsertMerchantWallet {
    pub merchant_id: u32,
    pub chain: ChainName,
    pub address: String,
    pub derivation_path: String,
}

impl Processor<UpsertMerchantWallet> for DatabaseProcessor {
    type Output = MerchantWalletRecord;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertMerchantWallet")]
    async fn process(
        &self,
        insert: UpsertMerchantWallet,
    ) -> Result<MerchantWalletRecord, sqlx::Error> {
        sqlx::query_as::<_, MerchantWalletRecord>(
            r#"
            INSERT INTO merchant_wallets (merchant_id, chain, address, derivation_path)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (merchant_id, chain)
            DO UPDATE SET address = merchant_wallets.address
            RETURNING id, merchant_id, chain, address, derivation_path, created_at
            "#,
        )
        .bind(i64::from(insert.merchant_id))
        .bind(insert.chain)
        .bind(insert.address)
        .bind(insert.derivation_path)
        .fetch_one(&self.pool)
        .await
    }
}
