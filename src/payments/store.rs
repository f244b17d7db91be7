use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr as _;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};

use super::{
    ConfirmationPriority, Payment, PaymentDirection, PaymentFilter, PaymentId, PaymentIndex,
    PaymentPage, PaymentStatus, PaymentUpdatedIndex,
};

/// What an upsert did to the stored record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored record already had the same remote state.
    Unchanged,
}

/// Counts for one batch applied by [`SqlitePaymentStore::apply_sync_batch`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub num_new: usize,
    pub num_updated: usize,
}

#[derive(Debug)]
pub struct SqlitePaymentStore {
    conn: Connection,
}

const PAYMENT_COLUMNS: &str = r#"
  created_at_ms,
  payment_id,
  rail,
  kind,
  direction,
  status,
  status_msg,
  amount_sats,
  fees_sats,
  note,
  invoice,
  txid,
  address,
  payer_name,
  payer_note,
  priority,
  expires_at_ms,
  updated_at_ms,
  finalized_at_ms
"#;

impl SqlitePaymentStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create payment store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn })
    }

    /// Insert `payment` if new, else overwrite every field but the note.
    /// Does not touch the sync watermark.
    pub fn upsert(&mut self, payment: &Payment) -> Result<UpsertOutcome> {
        let tx = self.conn.transaction().context("begin upsert")?;
        let outcome = upsert_in(&tx, payment)?;
        tx.commit().context("commit upsert")?;
        Ok(outcome)
    }

    /// Upsert a batch of synced payments and advance the watermark to the
    /// largest updated index in the batch, all in one transaction.
    pub fn apply_sync_batch(&mut self, payments: &[Payment]) -> Result<BatchOutcome> {
        let tx = self.conn.transaction().context("begin sync batch")?;

        let mut outcome = BatchOutcome::default();
        for payment in payments {
            match upsert_in(&tx, payment)? {
                UpsertOutcome::Inserted => outcome.num_new += 1,
                UpsertOutcome::Updated => outcome.num_updated += 1,
                UpsertOutcome::Unchanged => {}
            }
        }

        if let Some(batch_max) = payments.iter().map(Payment::updated_index).max() {
            let current = watermark_in(&tx)?;
            if current.is_none_or(|current| batch_max > current) {
                tx.execute(
                    r#"
INSERT INTO sync_watermark (id, updated_index) VALUES (0, ?1)
ON CONFLICT(id) DO UPDATE SET updated_index = excluded.updated_index
"#,
                    params![batch_max.to_string()],
                )
                .context("advance sync watermark")?;
            }
        }

        tx.commit().context("commit sync batch")?;
        Ok(outcome)
    }

    pub fn get(&self, index: &PaymentIndex) -> Result<Option<Payment>> {
        get_in(&self.conn, index)
    }

    /// Returns `false` if no payment with this index is stored.
    pub fn set_note(&mut self, index: &PaymentIndex, note: Option<&str>) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE payments SET note = ?3 WHERE created_at_ms = ?1 AND payment_id = ?2",
                params![
                    to_i64(index.created_at_ms(), "created_at_ms")?,
                    index.id().to_string(),
                    note
                ],
            )
            .with_context(|| format!("update note for {index}"))?;
        Ok(rows == 1)
    }

    /// Remember a note for a payment we initiated but have not synced yet.
    /// If the payment is already stored, the note is set on it directly.
    pub fn stash_pending_note(&mut self, index: &PaymentIndex, note: &str) -> Result<()> {
        let tx = self.conn.transaction().context("begin stash note")?;
        let rows = tx
            .execute(
                "UPDATE payments SET note = ?3 WHERE created_at_ms = ?1 AND payment_id = ?2",
                params![
                    to_i64(index.created_at_ms(), "created_at_ms")?,
                    index.id().to_string(),
                    note
                ],
            )
            .with_context(|| format!("update note for {index}"))?;
        if rows == 0 {
            tx.execute(
                r#"
INSERT INTO pending_notes (payment_id, note) VALUES (?1, ?2)
ON CONFLICT(payment_id) DO UPDATE SET note = excluded.note
"#,
                params![index.id().to_string(), note],
            )
            .with_context(|| format!("stash pending note for {index}"))?;
        }
        tx.commit().context("commit stash note")?;
        Ok(())
    }

    /// Newest first, by `(created_at_ms, payment_id)`.
    pub fn list(&self, filter: PaymentFilter, offset: u64, limit: u64) -> Result<PaymentPage> {
        let where_clause = match filter {
            PaymentFilter::All => "",
            PaymentFilter::Pending => "WHERE status = 'pending'",
            PaymentFilter::Finalized => "WHERE status <> 'pending'",
        };

        let total_count: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM payments {where_clause}"),
                [],
                |row| row.get(0),
            )
            .context("count payments")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments {where_clause}
ORDER BY created_at_ms DESC, payment_id DESC
LIMIT ?1 OFFSET ?2"
            ))
            .context("prepare list payments")?;

        let rows = stmt
            .query_map(
                params![
                    i64::try_from(limit).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX)
                ],
                payment_from_row,
            )
            .context("query list payments")?;

        let mut payments = Vec::new();
        for row in rows {
            payments.push(row.context("read payment row")?);
        }
        Ok(PaymentPage {
            payments,
            total_count: u64::try_from(total_count).context("negative payment count")?,
        })
    }

    /// Clears payments, pending notes and the watermark. Provision history is
    /// kept.
    pub fn delete_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("begin delete")?;
        tx.execute_batch(
            r#"
DELETE FROM payments;
DELETE FROM pending_notes;
DELETE FROM sync_watermark;
"#,
        )
        .context("delete local payments")?;
        tx.commit().context("commit delete")
    }

    pub fn latest_watermark(&self) -> Result<Option<PaymentUpdatedIndex>> {
        watermark_in(&self.conn)
    }

    pub fn provisioned_measurements(&self) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT measurement FROM provisioned_enclaves")
            .context("prepare provision history")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query provision history")?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row.context("read provision history row")?);
        }
        Ok(out)
    }

    pub fn record_provisioned(&mut self, measurement: &str, version: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO provisioned_enclaves (measurement, version) VALUES (?1, ?2)
ON CONFLICT(measurement) DO UPDATE SET version = excluded.version
"#,
                params![measurement, version],
            )
            .with_context(|| format!("record provisioned enclave {measurement}"))?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS payments (
  created_at_ms INTEGER NOT NULL,
  payment_id TEXT NOT NULL,
  rail TEXT NOT NULL,
  kind TEXT NOT NULL,
  direction TEXT NOT NULL,
  status TEXT NOT NULL,
  status_msg TEXT NOT NULL,
  amount_sats INTEGER,
  fees_sats INTEGER NOT NULL,
  note TEXT,
  invoice TEXT,
  txid TEXT,
  address TEXT,
  payer_name TEXT,
  payer_note TEXT,
  priority TEXT,
  expires_at_ms INTEGER,
  updated_at_ms INTEGER NOT NULL,
  finalized_at_ms INTEGER,
  PRIMARY KEY (created_at_ms, payment_id)
);
CREATE INDEX IF NOT EXISTS payments_status_idx ON payments(status);
CREATE INDEX IF NOT EXISTS payments_created_idx
  ON payments(created_at_ms DESC, payment_id DESC);

CREATE TABLE IF NOT EXISTS sync_watermark (
  id INTEGER PRIMARY KEY CHECK (id = 0),
  updated_index TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_notes (
  payment_id TEXT PRIMARY KEY,
  note TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provisioned_enclaves (
  measurement TEXT PRIMARY KEY,
  version TEXT NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn upsert_in(conn: &Connection, payment: &Payment) -> Result<UpsertOutcome> {
    let index = &payment.index;
    match get_in(conn, index)? {
        None => {
            let pending_note: Option<String> = conn
                .query_row(
                    "SELECT note FROM pending_notes WHERE payment_id = ?1",
                    params![index.id().to_string()],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("read pending note for {index}"))?;
            if pending_note.is_some() {
                conn.execute(
                    "DELETE FROM pending_notes WHERE payment_id = ?1",
                    params![index.id().to_string()],
                )
                .with_context(|| format!("clear pending note for {index}"))?;
            }
            let note = pending_note.or_else(|| payment.note.clone());
            conn.execute(
                &format!(
                    "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
)"
                ),
                params![
                    to_i64(index.created_at_ms(), "created_at_ms")?,
                    index.id().to_string(),
                    payment.rail.as_str(),
                    payment.kind.as_str(),
                    direction_to_str(payment.direction),
                    payment.status.as_str(),
                    &payment.status_msg,
                    payment.amount_sats.map(|v| to_i64(v, "amount_sats")).transpose()?,
                    to_i64(payment.fees_sats, "fees_sats")?,
                    note,
                    &payment.invoice,
                    &payment.txid,
                    &payment.address,
                    &payment.payer_name,
                    &payment.payer_note,
                    payment.priority.map(priority_to_str),
                    payment.expires_at_ms.map(|v| to_i64(v, "expires_at_ms")).transpose()?,
                    to_i64(payment.updated_at_ms, "updated_at_ms")?,
                    payment.finalized_at_ms.map(|v| to_i64(v, "finalized_at_ms")).transpose()?,
                ],
            )
            .with_context(|| format!("insert payment {index}"))?;
            Ok(UpsertOutcome::Inserted)
        }
        Some(stored) if stored.same_remote_state(payment) => Ok(UpsertOutcome::Unchanged),
        Some(_) => {
            conn.execute(
                r#"
UPDATE payments SET
  rail = ?3,
  kind = ?4,
  direction = ?5,
  status = ?6,
  status_msg = ?7,
  amount_sats = ?8,
  fees_sats = ?9,
  invoice = ?10,
  txid = ?11,
  address = ?12,
  payer_name = ?13,
  payer_note = ?14,
  priority = ?15,
  expires_at_ms = ?16,
  updated_at_ms = ?17,
  finalized_at_ms = ?18
WHERE created_at_ms = ?1 AND payment_id = ?2
"#,
                params![
                    to_i64(index.created_at_ms(), "created_at_ms")?,
                    index.id().to_string(),
                    payment.rail.as_str(),
                    payment.kind.as_str(),
                    direction_to_str(payment.direction),
                    payment.status.as_str(),
                    &payment.status_msg,
                    payment.amount_sats.map(|v| to_i64(v, "amount_sats")).transpose()?,
                    to_i64(payment.fees_sats, "fees_sats")?,
                    &payment.invoice,
                    &payment.txid,
                    &payment.address,
                    &payment.payer_name,
                    &payment.payer_note,
                    payment.priority.map(priority_to_str),
                    payment.expires_at_ms.map(|v| to_i64(v, "expires_at_ms")).transpose()?,
                    to_i64(payment.updated_at_ms, "updated_at_ms")?,
                    payment.finalized_at_ms.map(|v| to_i64(v, "finalized_at_ms")).transpose()?,
                ],
            )
            .with_context(|| format!("update payment {index}"))?;
            Ok(UpsertOutcome::Updated)
        }
    }
}

fn get_in(conn: &Connection, index: &PaymentIndex) -> Result<Option<Payment>> {
    conn.query_row(
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE created_at_ms = ?1 AND payment_id = ?2"
        ),
        params![
            to_i64(index.created_at_ms(), "created_at_ms")?,
            index.id().to_string()
        ],
        payment_from_row,
    )
    .optional()
    .with_context(|| format!("get payment {index}"))
}

fn watermark_in(conn: &Connection) -> Result<Option<PaymentUpdatedIndex>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT updated_index FROM sync_watermark WHERE id = 0",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("read sync watermark")?;
    raw.map(|s| {
        PaymentUpdatedIndex::from_str(&s).with_context(|| format!("stored watermark {s:?}"))
    })
    .transpose()
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let created_at_ms = from_i64(row.get(0)?, 0)?;
    let payment_id: String = row.get(1)?;
    let id = payment_id
        .parse::<PaymentId>()
        .map_err(|e: anyhow::Error| conversion_error(1, rusqlite::types::Type::Text, e))?;
    let index = PaymentIndex::new(created_at_ms, id)
        .map_err(|e| conversion_error(0, rusqlite::types::Type::Integer, e))?;

    let direction_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let priority_str: Option<String> = row.get(15)?;

    Ok(Payment {
        index,
        rail: row.get::<_, String>(2)?.into(),
        kind: row.get::<_, String>(3)?.into(),
        direction: direction_from_str(&direction_str, 4)?,
        status: status_from_str(&status_str, 5)?,
        status_msg: row.get(6)?,
        amount_sats: row.get::<_, Option<i64>>(7)?.map(|v| from_i64(v, 7)).transpose()?,
        fees_sats: from_i64(row.get(8)?, 8)?,
        note: row.get(9)?,
        invoice: row.get(10)?,
        txid: row.get(11)?,
        address: row.get(12)?,
        payer_name: row.get(13)?,
        payer_note: row.get(14)?,
        priority: priority_str
            .as_deref()
            .map(|s| priority_from_str(s, 15))
            .transpose()?,
        expires_at_ms: row.get::<_, Option<i64>>(16)?.map(|v| from_i64(v, 16)).transpose()?,
        updated_at_ms: from_i64(row.get(17)?, 17)?,
        finalized_at_ms: row.get::<_, Option<i64>>(18)?.map(|v| from_i64(v, 18)).transpose()?,
    })
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{what} out of range: {value}"))
}

fn from_i64(value: i64, col: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Integer,
            format!("negative value {value}").into(),
        )
    })
}

fn conversion_error(
    col: usize,
    ty: rusqlite::types::Type,
    err: anyhow::Error,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, ty, err.into())
}

fn direction_to_str(direction: PaymentDirection) -> &'static str {
    match direction {
        PaymentDirection::Inbound => "inbound",
        PaymentDirection::Outbound => "outbound",
        PaymentDirection::Info => "info",
    }
}

fn direction_from_str(s: &str, col: usize) -> rusqlite::Result<PaymentDirection> {
    match s {
        "inbound" => Ok(PaymentDirection::Inbound),
        "outbound" => Ok(PaymentDirection::Outbound),
        "info" => Ok(PaymentDirection::Info),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown payment direction: {other}").into(),
        )),
    }
}

fn status_from_str(s: &str, col: usize) -> rusqlite::Result<PaymentStatus> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown payment status: {other}").into(),
        )),
    }
}

fn priority_to_str(priority: ConfirmationPriority) -> &'static str {
    match priority {
        ConfirmationPriority::High => "high",
        ConfirmationPriority::Normal => "normal",
        ConfirmationPriority::Background => "background",
    }
}

fn priority_from_str(s: &str, col: usize) -> rusqlite::Result<ConfirmationPriority> {
    match s {
        "high" => Ok(ConfirmationPriority::High),
        "normal" => Ok(ConfirmationPriority::Normal),
        "background" => Ok(ConfirmationPriority::Background),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown confirmation priority: {other}").into(),
        )),
    }
}
