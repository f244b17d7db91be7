mod support;

use anyhow::{Context as _, Result};

use ln_wallet_sync::payments::store::{SqlitePaymentStore, UpsertOutcome};
use ln_wallet_sync::payments::{PaymentFilter, PaymentStatus};

use support::fixtures::{finalized, pending_ln};

#[test]
fn sqlite_store_upsert_get_note_list() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("wallet.sqlite3");

    let mut store = SqlitePaymentStore::open(path).context("open sqlite store")?;

    let a = pending_ln(1_000, 1);
    assert_eq!(store.upsert(&a)?, UpsertOutcome::Inserted);
    let got = store
        .get(&a.index)
        .context("get a")?
        .context("a missing")?;
    assert_eq!(got, a);

    assert!(store.set_note(&a.index, Some("coffee"))?);

    // Same remote state: nothing to do, note untouched.
    assert_eq!(store.upsert(&a)?, UpsertOutcome::Unchanged);

    let a_done = finalized(a.clone(), PaymentStatus::Completed, 2_000);
    assert_eq!(store.upsert(&a_done)?, UpsertOutcome::Updated);
    let got = store
        .get(&a.index)
        .context("get a after update")?
        .context("a missing after update")?;
    assert_eq!(got.status, PaymentStatus::Completed);
    assert_eq!(got.finalized_at_ms, Some(2_000));
    assert_eq!(got.note.as_deref(), Some("coffee"));

    let b = pending_ln(1_500, 2);
    let c = pending_ln(500, 3);
    store.upsert(&b)?;
    store.upsert(&c)?;

    let page = store.list(PaymentFilter::All, 0, 10)?;
    assert_eq!(page.total_count, 3);
    let order = page.payments.iter().map(|p| p.index).collect::<Vec<_>>();
    assert_eq!(order, vec![b.index, a.index, c.index]);

    let page = store.list(PaymentFilter::All, 1, 1)?;
    assert_eq!(page.total_count, 3);
    assert_eq!(page.payments.len(), 1);
    assert_eq!(page.payments[0].index, a.index);

    let pending = store.list(PaymentFilter::Pending, 0, 10)?;
    assert_eq!(pending.total_count, 2);
    assert!(pending.payments.iter().all(|p| PaymentFilter::Pending.matches(p)));

    let finalized_page = store.list(PaymentFilter::Finalized, 0, 10)?;
    assert_eq!(finalized_page.total_count, 1);
    assert_eq!(finalized_page.payments[0].index, a.index);

    let missing = pending_ln(9_999, 9);
    assert!(!store.set_note(&missing.index, Some("nope"))?);
    assert!(store.get(&missing.index)?.is_none());

    assert!(store.set_note(&a.index, None)?);
    let got = store.get(&a.index)?.context("a missing")?;
    assert_eq!(got.note, None);

    Ok(())
}

#[test]
fn sqlite_store_sync_batch_moves_watermark_and_delete_resets_it() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store = SqlitePaymentStore::open(dir.path().join("wallet.sqlite3"))?;
    assert_eq!(store.latest_watermark()?, None);

    let a = pending_ln(1_000, 1);
    let b = pending_ln(1_001, 2);
    let outcome = store.apply_sync_batch(&[a.clone(), b.clone()])?;
    assert_eq!((outcome.num_new, outcome.num_updated), (2, 0));
    assert_eq!(store.latest_watermark()?, Some(b.updated_index()));

    // Plain upserts leave the watermark alone.
    let a_done = finalized(a.clone(), PaymentStatus::Failed, 5_000);
    store.upsert(&a_done)?;
    assert_eq!(store.latest_watermark()?, Some(b.updated_index()));

    // An older batch never moves the watermark backwards.
    let outcome = store.apply_sync_batch(&[a.clone()])?;
    assert_eq!((outcome.num_new, outcome.num_updated), (0, 1));
    assert_eq!(store.latest_watermark()?, Some(b.updated_index()));

    let outcome = store.apply_sync_batch(&[a_done.clone()])?;
    assert_eq!((outcome.num_new, outcome.num_updated), (0, 1));
    assert_eq!(store.latest_watermark()?, Some(a_done.updated_index()));

    store.record_provisioned("aa", "0.1.0")?;
    store.delete_all()?;
    assert_eq!(store.latest_watermark()?, None);
    assert_eq!(store.list(PaymentFilter::All, 0, 10)?.total_count, 0);
    assert!(store.provisioned_measurements()?.contains("aa"));

    Ok(())
}

#[test]
fn sqlite_store_attaches_pending_note_on_first_insert() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store = SqlitePaymentStore::open(dir.path().join("wallet.sqlite3"))?;

    let a = pending_ln(1_000, 1);
    store.stash_pending_note(&a.index, "rent")?;
    assert!(store.get(&a.index)?.is_none());

    store.apply_sync_batch(&[a.clone()])?;
    let got = store.get(&a.index)?.context("a missing")?;
    assert_eq!(got.note.as_deref(), Some("rent"));

    // Consumed: deleting and resyncing does not bring it back.
    store.delete_all()?;
    store.apply_sync_batch(&[a.clone()])?;
    assert_eq!(store.get(&a.index)?.context("a missing")?.note, None);

    // Already stored: the note is set directly.
    store.stash_pending_note(&a.index, "groceries")?;
    assert_eq!(
        store.get(&a.index)?.context("a missing")?.note.as_deref(),
        Some("groceries")
    );

    Ok(())
}

#[test]
fn sqlite_store_persists_across_reopen() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("nested").join("wallet.sqlite3");

    let a = pending_ln(1_000, 1);
    {
        let mut store = SqlitePaymentStore::open(path.clone())?;
        store.apply_sync_batch(&[a.clone()])?;
        store.set_note(&a.index, Some("kept"))?;
    }

    let store = SqlitePaymentStore::open(path)?;
    let got = store.get(&a.index)?.context("a missing after reopen")?;
    assert_eq!(got.note.as_deref(), Some("kept"));
    assert_eq!(store.latest_watermark()?, Some(a.updated_index()));
    Ok(())
}
