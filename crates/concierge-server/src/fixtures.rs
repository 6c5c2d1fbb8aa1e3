//! Canonical stock-trading workflow fixture, used by the integration tests
//! and as the default workflow when `concierge-server` is run without a
//! custom workflow wired in. Grounded on the bundled `simple_stock` sample
//! workflow: three stages (browse, transact, portfolio), a
//! `symbol`/`quantity` prerequisite gate on `transact`, and an explicit
//! `TransferAll` policy from `browse` to `portfolio`.

use std::sync::Arc;

use concierge_core::{
    ConciergeError, StageBuilder, ToolDefinition, TransitionPolicy, Workflow, WorkflowBuilder,
};
use serde_json::json;

pub fn stock_workflow() -> Arc<Workflow> {
    let search = ToolDefinition::new(
        "search",
        "Search for a stock by symbol",
        json!({
            "type": "object",
            "properties": {"symbol": {"type": "string", "description": "Stock symbol like AAPL, GOOGL"}},
            "required": ["symbol"],
        }),
        |_ctx, args| async move {
            let symbol = args.get("symbol").and_then(|v| v.as_str()).unwrap_or("?").to_string();
            Ok(json!({"result": format!("Found {symbol}: $150.00"), "symbol": symbol, "price": 150.0}))
        },
    );

    let add_to_cart = ToolDefinition::new(
        "add_to_cart",
        "Add a stock to the cart",
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string"},
                "quantity": {"type": "integer", "minimum": 1},
            },
            "required": ["symbol", "quantity"],
        }),
        |ctx, args| async move {
            let symbol = args
                .get("symbol")
                .cloned()
                .ok_or_else(|| ConciergeError::tool_error("add_to_cart", "symbol is required"))?;
            let quantity = args
                .get("quantity")
                .cloned()
                .ok_or_else(|| ConciergeError::tool_error("add_to_cart", "quantity is required"))?;
            ctx.set("symbol", symbol.clone()).await?;
            ctx.set("quantity", quantity.clone()).await?;
            Ok(json!({"result": format!("Added {} shares of {}", quantity, symbol)}))
        },
    );

    let view_history = ToolDefinition::new(
        "view_history",
        "View a stock's price history",
        json!({"type": "object", "properties": {"symbol": {"type": "string"}}, "required": ["symbol"]}),
        |_ctx, args| async move {
            let symbol = args.get("symbol").and_then(|v| v.as_str()).unwrap_or("?").to_string();
            Ok(json!({"result": format!("{symbol} history: [100, 120, 150]")}))
        },
    );

    let buy = ToolDefinition::new(
        "buy",
        "Buy the stock currently held in the cart",
        json!({"type": "object", "properties": {}}),
        |ctx, _args| async move {
            let symbol = ctx.get("symbol").await?.unwrap_or(json!("?"));
            let quantity = ctx.get("quantity").await?.unwrap_or(json!(0));
            Ok(json!({"order_id": "ORD123", "status": format!("Bought {} shares of {}", quantity, symbol)}))
        },
    )
    .with_output_schema(json!({
        "type": "object",
        "properties": {"order_id": {"type": "string"}, "status": {"type": "string"}},
    }));

    let sell = ToolDefinition::new(
        "sell",
        "Sell the stock currently held in the cart",
        json!({"type": "object", "properties": {}}),
        |ctx, _args| async move {
            let symbol = ctx.get("symbol").await?.unwrap_or(json!("?"));
            let quantity = ctx.get("quantity").await?.unwrap_or(json!(0));
            Ok(json!({"order_id": "ORD456", "status": format!("Sold {} shares of {}", quantity, symbol)}))
        },
    )
    .with_output_schema(json!({
        "type": "object",
        "properties": {"order_id": {"type": "string"}, "status": {"type": "string"}},
    }));

    let view_holdings = ToolDefinition::new(
        "view_holdings",
        "View current holdings",
        json!({"type": "object", "properties": {}}),
        |_ctx, _args| async { Ok(json!({"result": "Holdings: AAPL: 10 shares, GOOGL: 5 shares"})) },
    );

    let view_profit = ToolDefinition::new(
        "view_profit",
        "View profit and loss",
        json!({"type": "object", "properties": {}}),
        |_ctx, _args| async { Ok(json!({"result": "Total profit: +$1,234.56"})) },
    );

    WorkflowBuilder::new("stock_exchange")
        .stage(
            StageBuilder::new("browse")
                .tool(search)
                .tool(add_to_cart)
                .tool(view_history)
                .transition_policy(
                    "transact",
                    TransitionPolicy::Transfer(vec!["symbol".into(), "quantity".into()]),
                )
                .transition_policy("portfolio", TransitionPolicy::TransferAll),
        )
        .stage(
            StageBuilder::new("transact")
                .tool(buy)
                .tool(sell)
                .prerequisites(["symbol", "quantity"]),
        )
        .stage(StageBuilder::new("portfolio").tool(view_holdings).tool(view_profit))
        .transitions([
            ("browse", vec!["transact", "portfolio"]),
            ("transact", vec!["portfolio", "browse"]),
            ("portfolio", vec!["browse"]),
        ])
        .build()
        .expect("fixture workflow is internally consistent")
}
