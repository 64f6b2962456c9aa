//! Policy listing handler

use axum::Json;
use serde_json::json;

use crate::domain::{ACTION_CONFIDENTIAL_LLM_CALL, POLICY_CONFIDENTIAL_PROXY};

/// `GET /v1/policies` - the actions this node will sign receipts for.
pub async fn policies() -> Json<serde_json::Value> {
    Json(json!({
        "policies": [
            {
                "policy_id": POLICY_CONFIDENTIAL_PROXY,
                "action_type": ACTION_CONFIDENTIAL_LLM_CALL,
            }
        ]
    }))
}
