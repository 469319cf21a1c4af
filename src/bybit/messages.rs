//! Bybit v5 public spot WS frames.
//!
//! Outgoing frames are `{op, args, req_id}`; acks echo the `req_id`.
//! Order-book data frames carry `topic: "orderbook.<depth>.<SYMBOL>"`
//! with `type: "snapshot" | "delta"` and `[price, qty]` string rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::market::orderbook::RawLevels;

pub const TOPIC_PREFIX: &str = "orderbook.";

pub fn orderbook_topic(depth: u32, symbol: &str) -> String {
    format!("{TOPIC_PREFIX}{depth}.{symbol}")
}

#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub op: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

impl WsRequest {
    pub fn ping() -> Self {
        Self {
            op: "ping".to_string(),
            args: Vec::new(),
            req_id: None,
        }
    }

    pub fn topics(op: &str, topics: &[String], req_id: String) -> Self {
        Self {
            op: op.to_string(),
            args: topics.to_vec(),
            req_id: Some(req_id),
        }
    }
}

/// Any incoming frame. Fields are optional because ack, ping and data
/// frames share one stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsIncoming {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub req_id: Option<String>,
    #[serde(default)]
    pub ret_msg: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, rename = "type")]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub cts: Option<i64>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl WsIncoming {
    pub fn is_ack(&self) -> bool {
        matches!(self.op.as_deref(), Some("subscribe") | Some("unsubscribe"))
    }

    pub fn is_ping_pong(&self) -> bool {
        matches!(self.op.as_deref(), Some("ping") | Some("pong"))
    }

    pub fn is_orderbook(&self) -> bool {
        self.topic
            .as_deref()
            .map_or(false, |t| t.starts_with(TOPIC_PREFIX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookKind {
    Snapshot,
    Delta,
}

/// One order-book update, normalized for the sink.
#[derive(Debug, Clone)]
pub struct BookMessage {
    pub symbol: String,
    pub kind: BookKind,
    pub bids: RawLevels,
    pub asks: RawLevels,
    pub ts_ms: i64,
    pub cts_ms: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BookPayload {
    #[serde(default, alias = "symbol")]
    s: Option<String>,
    #[serde(default, alias = "bids")]
    b: RawLevels,
    #[serde(default, alias = "asks")]
    a: RawLevels,
}

/// Extract book updates from a data frame. The symbol comes from the
/// payload, falling back to the last topic segment. Payloads may be a
/// single object or a list of objects.
pub fn parse_book_frames(msg: &WsIncoming, now_ms: i64) -> Vec<BookMessage> {
    let Some(data) = &msg.data else {
        return Vec::new();
    };

    let parts: Vec<&Value> = match data {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).collect(),
        Value::Object(_) => vec![data],
        _ => return Vec::new(),
    };

    let topic_symbol = msg
        .topic
        .as_deref()
        .and_then(|t| t.rsplit('.').next())
        .map(str::to_string);

    let kind = match msg.msg_type.as_deref() {
        Some("snapshot") => BookKind::Snapshot,
        _ => BookKind::Delta,
    };

    let ts_ms = msg.ts.unwrap_or(now_ms);
    let cts_ms = msg.cts.unwrap_or(ts_ms);

    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        let payload: BookPayload = match serde_json::from_value(part.clone()) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let symbol = payload.s.or_else(|| topic_symbol.clone());
        let Some(symbol) = symbol else {
            continue;
        };
        if payload.b.is_empty() && payload.a.is_empty() && kind != BookKind::Snapshot {
            continue;
        }
        out.push(BookMessage {
            symbol,
            kind,
            bids: payload.b,
            asks: payload.a,
            ts_ms,
            cts_ms,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_format() {
        assert_eq!(orderbook_topic(50, "WIFUSDT"), "orderbook.50.WIFUSDT");
    }

    #[test]
    fn request_serializes_without_empty_fields() {
        let ping = serde_json::to_string(&WsRequest::ping()).unwrap();
        assert_eq!(ping, r#"{"op":"ping"}"#);

        let sub = WsRequest::topics(
            "subscribe",
            &["orderbook.50.WIFUSDT".to_string()],
            "abc".to_string(),
        );
        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains(r#""req_id":"abc""#));
        assert!(json.contains(r#""args":["orderbook.50.WIFUSDT"]"#));
    }

    #[test]
    fn classifies_frames() {
        let ack: WsIncoming =
            serde_json::from_str(r#"{"op":"subscribe","success":true,"req_id":"x"}"#).unwrap();
        assert!(ack.is_ack());

        let pong: WsIncoming = serde_json::from_str(r#"{"op":"pong"}"#).unwrap();
        assert!(pong.is_ping_pong());

        let data: WsIncoming = serde_json::from_str(
            r#"{"topic":"orderbook.50.WIFUSDT","type":"delta","data":{"s":"WIFUSDT","b":[],"a":[["2.01","5"]]}}"#,
        )
        .unwrap();
        assert!(data.is_orderbook());
    }

    #[test]
    fn parses_snapshot_frame() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{
                "topic": "orderbook.50.WIFUSDT",
                "type": "snapshot",
                "ts": 1000,
                "cts": 999,
                "data": {"s": "WIFUSDT", "b": [["2.00","10"]], "a": [["2.01","5"]]}
            }"#,
        )
        .unwrap();
        let frames = parse_book_frames(&msg, 2000);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].symbol, "WIFUSDT");
        assert_eq!(frames[0].kind, BookKind::Snapshot);
        assert_eq!(frames[0].bids.len(), 1);
        assert_eq!(frames[0].ts_ms, 1000);
        assert_eq!(frames[0].cts_ms, 999);
    }

    #[test]
    fn symbol_falls_back_to_topic_segment() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"topic":"orderbook.50.WIFUSDT","type":"delta","data":{"b":[["2.00","1"]],"a":[]}}"#,
        )
        .unwrap();
        let frames = parse_book_frames(&msg, 2000);
        assert_eq!(frames[0].symbol, "WIFUSDT");
        // No ts in the frame: falls back to the provided clock.
        assert_eq!(frames[0].ts_ms, 2000);
    }

    #[test]
    fn empty_delta_frames_are_dropped() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"topic":"orderbook.50.WIFUSDT","type":"delta","data":{"s":"WIFUSDT","b":[],"a":[]}}"#,
        )
        .unwrap();
        assert!(parse_book_frames(&msg, 0).is_empty());
    }

    #[test]
    fn list_payloads_are_flattened() {
        let msg: WsIncoming = serde_json::from_str(
            r#"{"topic":"orderbook.50.WIFUSDT","type":"delta","data":[
                {"s":"WIFUSDT","b":[["2","1"]],"a":[]},
                {"s":"WIFUSDT","b":[],"a":[["2.1","3"]]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(parse_book_frames(&msg, 0).len(), 2);
    }
}
