// reporter.rs — Persistence sink: consumes ReportData, writes the store,
// appends a daily CSV execution journal, forwards executions to the admin
// channel, and replays still-open positions into the strategy at boot.
use std::sync::Arc;

use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::data::{ControlOrder, ExecutionAck, ReportData, TxStatus};
use crate::gateway::hex_address;
use crate::publisher::StatusPublisher;
use crate::store::Store;

pub struct Reporter {
    store: Arc<Store>,
    gas_cost: Decimal,
    publisher: Option<StatusPublisher>,
    journal_dir: std::path::PathBuf,
}

impl Reporter {
    pub fn new(
        store: Arc<Store>,
        gas_cost: Decimal,
        publisher: Option<StatusPublisher>,
        journal_dir: impl Into<std::path::PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gas_cost,
            publisher,
            journal_dir: journal_dir.into(),
        })
    }

    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<ReportData>,
        control_sender: mpsc::Sender<ControlOrder>,
    ) {
        self.bootstrap(&control_sender).await;

        info!("[REPORTER] listening for reports...");
        while let Some(report) = receiver.recv().await {
            self.handle(report).await;
        }
    }

    /// Replays still-open positions purchased within the last hour so the
    /// strategy re-evaluates them immediately after a restart.
    pub async fn bootstrap(&self, control_sender: &mpsc::Sender<ControlOrder>) {
        let pending = self.store.pending_positions();
        if pending.is_empty() {
            return;
        }
        warn!("[REPORTER] bootstrap {} pending positions", pending.len());
        let _ = control_sender
            .send(ControlOrder::PendingPositions(pending))
            .await;
    }

    pub async fn handle(&self, report: ReportData) {
        match report {
            ReportData::Block(block) => {
                self.store.upsert_block(&block);
            }
            ReportData::Execution(ack) => {
                self.store.record_execution(&ack, self.gas_cost);
                self.journal_execution(&ack);
                if let Some(publisher) = &self.publisher {
                    if let Err(e) = publisher.publish_execution(&ack).await {
                        warn!("[REPORTER] publish execution failed: {}", e);
                    }
                }
            }
            ReportData::BlacklistAdded(addresses) => {
                self.store.add_blacklist(&addresses);
            }
        }
    }

    /// Appends one row per ack to data/executions/YYYY-MM-DD.csv.
    fn journal_execution(&self, ack: &ExecutionAck) {
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        if let Err(e) = std::fs::create_dir_all(&self.journal_dir) {
            error!("[REPORTER] journal dir error: {}", e);
            return;
        }
        let path = self.journal_dir.join(format!("{}.csv", date));
        let file = match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                error!("[REPORTER] journal open {:?} failed: {}", path, e);
                return;
            }
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let row = (
            chrono::Utc::now().timestamp_millis(),
            ack.block_number,
            hex_address(ack.pair.address),
            ack.tx_hash.clone(),
            ack.is_buy,
            ack.is_paper,
            ack.tx_status == TxStatus::Success,
            ack.amount_in.to_string(),
            ack.amount_out.to_string(),
        );
        if let Err(e) = writer.serialize(row) {
            error!("[REPORTER] journal write failed: {}", e);
            return;
        }
        if let Err(e) = writer.flush() {
            error!("[REPORTER] journal flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;
    use rust_decimal_macros::dec;

    use crate::data::{BlockData, Pair};

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("snipe-reporter-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    fn reporter_with_store() -> (Arc<Reporter>, Arc<Store>) {
        let store = Arc::new(Store::load(temp_path("store")));
        let reporter = Reporter::new(store.clone(), dec!(0.0002), None, temp_path("journal"));
        (reporter, store)
    }

    fn sample_pair() -> Pair {
        let mut pair = Pair::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb), 1, 1_000);
        pair.creator = Some(Address::repeat_byte(0xcc));
        pair
    }

    fn sample_ack(is_buy: bool) -> ExecutionAck {
        ExecutionAck {
            lead_block: 1,
            block_number: 2,
            tx_hash: "0xabc".to_string(),
            tx_status: TxStatus::Success,
            pair: sample_pair(),
            amount_in: dec!(0.01),
            amount_out: if is_buy { dec!(1000) } else { dec!(0.012) },
            is_buy,
            signer: None,
            bot: None,
            is_paper: false,
        }
    }

    #[tokio::test]
    async fn test_block_report_persists_block_and_pairs() {
        let (reporter, store) = reporter_with_store();
        let block = BlockData {
            block_number: 42,
            block_timestamp: 1_700_000_000,
            base_fee: 7,
            gas_used: 100,
            gas_limit: 200,
            pairs: vec![sample_pair()],
            inventory: vec![],
        };
        reporter.handle(ReportData::Block(block)).await;

        // A second delivery is an upsert, not a duplicate.
        let pending = store.pending_positions();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_execution_report_writes_journal_and_store() {
        let (reporter, store) = reporter_with_store();
        reporter
            .handle(ReportData::Execution(sample_ack(true)))
            .await;

        // The open position is visible through the bootstrap query.
        assert_eq!(store.pending_positions().len(), 1);

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let journal = reporter.journal_dir.join(format!("{}.csv", date));
        let content = std::fs::read_to_string(journal).unwrap();
        assert!(content.contains("0xabc"));
    }

    #[tokio::test]
    async fn test_blacklist_report_freezes_creator() {
        let (reporter, store) = reporter_with_store();
        let creator = Address::repeat_byte(0xcc);
        reporter
            .handle(ReportData::BlacklistAdded(vec![creator]))
            .await;
        assert!(store.is_blacklisted(creator, 3_600));
    }

    #[tokio::test]
    async fn test_bootstrap_emits_pending_positions() {
        let (reporter, _store) = reporter_with_store();
        reporter
            .handle(ReportData::Execution(sample_ack(true)))
            .await;

        let (control_tx, mut control_rx) = mpsc::channel(8);
        reporter.bootstrap(&control_tx).await;
        match control_rx.try_recv().unwrap() {
            ControlOrder::PendingPositions(positions) => {
                assert_eq!(positions.len(), 1);
                assert_eq!(positions[0].amount, dec!(1000));
            }
        }
    }

    #[tokio::test]
    async fn test_bootstrap_is_silent_with_no_open_positions() {
        let (reporter, _store) = reporter_with_store();
        let (control_tx, mut control_rx) = mpsc::channel(8);
        reporter.bootstrap(&control_tx).await;
        assert!(control_rx.try_recv().is_err());
    }
}
