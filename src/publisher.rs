// ─────────────────────────────────────────────────────────────────────────────
// publisher.rs — Redis bridge to the admin dashboard
//
// Channel layout (all prefixed with "sniper:"):
//   sniper:engine_status → heartbeat: session id, epoch pnl, sizing, kill switch
//   sniper:executions    → one message per execution ack
//
// Redis being unavailable is never fatal; the engine trades without it.
// ─────────────────────────────────────────────────────────────────────────────
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::error::Error;

use crate::data::ExecutionAck;
use crate::gateway::hex_address;

const CHANNEL_ENGINE_STATUS: &str = "sniper:engine_status";
const CHANNEL_EXECUTIONS: &str = "sniper:executions";

pub struct StatusPublisher {
    client: redis::Client,
}

impl StatusPublisher {
    pub fn new(redis_url: &str) -> Option<Self> {
        redis::Client::open(redis_url)
            .ok()
            .map(|client| Self { client })
    }

    /// Heartbeat with the sizing controller state for the dashboard.
    pub async fn publish_status(
        &self,
        session_id: &str,
        epoch_pnl: Decimal,
        auto_run: bool,
        buy_amount: Decimal,
    ) -> Result<(), Box<dyn Error>> {
        let mut con = self.client.get_async_connection().await?;
        let payload = serde_json::json!({
            "session_id": session_id,
            "epoch_pnl":  epoch_pnl.to_string(),
            "auto_run":   auto_run,
            "buy_amount": buy_amount.to_string(),
            "ts_ms": chrono::Utc::now().timestamp_millis(),
        });
        let _: () = con
            .publish(CHANNEL_ENGINE_STATUS, payload.to_string())
            .await?;
        Ok(())
    }

    pub async fn publish_execution(&self, ack: &ExecutionAck) -> Result<(), Box<dyn Error>> {
        let mut con = self.client.get_async_connection().await?;
        let payload = serde_json::json!({
            "pair":       hex_address(ack.pair.address),
            "token":      hex_address(ack.pair.token),
            "tx_hash":    ack.tx_hash,
            "is_buy":     ack.is_buy,
            "is_paper":   ack.is_paper,
            "status":     format!("{:?}", ack.tx_status),
            "amount_in":  ack.amount_in.to_string(),
            "amount_out": ack.amount_out.to_string(),
            "block":      ack.block_number,
        });
        let _: () = con.publish(CHANNEL_EXECUTIONS, payload.to_string()).await?;
        Ok(())
    }
}
