//! Post-Trade Guard Tasks
//!
//! Renders the profitability guard attached to every settlement call and
//! compiles it to bytecode through the dispair deployer's `parse2`.
//!
//! Two guard shapes:
//!     - Bounty: the arb contract passes the input/output amounts it captured
//!       as context column 1, so the bounty is a flat price × amount sum
//!     - Withdraw: `clear2` returns nothing, so the guard compares the bot's
//!       live token balances against balances read before the trade
//!
//! All numeric arguments are 18-decimal fixed point rendered with
//! `format_units_18`. The text is re-parsed onchain, so the templates are
//! fixed and only parameters are substituted.
//!
//! Created: 2026-10-19

use crate::client::ChainClient;
use crate::contracts::{EvaluableV3, IParserV2, TaskV1};
use crate::math::format_units_18;
use crate::rpc::RpcError;
use crate::types::Dispair;
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use tracing::debug;

/// Guard compilation failure; never retried by the search
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("parse2 call failed: {0}")]
    Parse(RpcError),
    #[error("parse2 returned undecodable data: {0}")]
    Decode(String),
}

/// Parameters of a guard, everything except the minimum bounty
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Bounty {
        input_to_eth_price: U256,
        output_to_eth_price: U256,
        sender: Address,
    },
    Withdraw {
        bot: Address,
        input_token: Address,
        output_token: Address,
        org_input_balance_18: U256,
        org_output_balance_18: U256,
        input_to_eth_price: U256,
        output_to_eth_price: U256,
        sender: Address,
    },
}

impl Guard {
    /// Guard text requiring at least `minimum` native-asset bounty
    pub fn render(&self, minimum: U256) -> String {
        match self {
            Guard::Bounty {
                input_to_eth_price,
                output_to_eth_price,
                sender,
            } => bounty_ensure_rainlang(*input_to_eth_price, *output_to_eth_price, minimum, *sender),
            Guard::Withdraw {
                bot,
                input_token,
                output_token,
                org_input_balance_18,
                org_output_balance_18,
                input_to_eth_price,
                output_to_eth_price,
                sender,
            } => withdraw_ensure_rainlang(
                *bot,
                *input_token,
                *output_token,
                *org_input_balance_18,
                *org_output_balance_18,
                *input_to_eth_price,
                *output_to_eth_price,
                minimum,
                *sender,
            ),
        }
    }
}

/// Flat bounty guard: `context<1 0>` / `context<1 1>` are the captured input
/// and output amounts.
pub fn bounty_ensure_rainlang(
    input_to_eth_price: U256,
    output_to_eth_price: U256,
    minimum_expected: U256,
    sender: Address,
) -> String {
    format!(
        r#"/* sender check */
:ensure(equal-to({sender} context<0 0>()) "unknown sender"),
/* bounty check */
total-bounty-eth: add(
    mul({input_price} context<1 0>())
    mul({output_price} context<1 1>())
),
:ensure(
    greater-than-or-equal-to(
        total-bounty-eth
        {minimum}
    )
    "minimum sender output"
);"#,
        sender = sender,
        input_price = format_units_18(input_to_eth_price),
        output_price = format_units_18(output_to_eth_price),
        minimum = format_units_18(minimum_expected),
    )
}

/// Balance-delta guard evaluated as the last `withdraw2` task
#[allow(clippy::too_many_arguments)]
pub fn withdraw_ensure_rainlang(
    bot: Address,
    input_token: Address,
    output_token: Address,
    org_input_balance_18: U256,
    org_output_balance_18: U256,
    input_to_eth_price: U256,
    output_to_eth_price: U256,
    minimum_expected: U256,
    sender: Address,
) -> String {
    format!(
        r#"/* sender check */
:ensure(equal-to({sender} context<0 0>()) "unknown sender"),
/* bounty check */
input-bounty: sub(
    erc20-balance-of({input_token} {bot})
    {org_input}
),
output-bounty: sub(
    erc20-balance-of({output_token} {bot})
    {org_output}
),
total-bounty-eth: add(
    mul(input-bounty {input_price})
    mul(output-bounty {output_price})
),
:ensure(
    greater-than-or-equal-to(
        total-bounty-eth
        {minimum}
    )
    "minimum sender output"
);"#,
        sender = sender,
        bot = bot,
        input_token = input_token,
        output_token = output_token,
        org_input = format_units_18(org_input_balance_18),
        org_output = format_units_18(org_output_balance_18),
        input_price = format_units_18(input_to_eth_price),
        output_price = format_units_18(output_to_eth_price),
        minimum = format_units_18(minimum_expected),
    )
}

/// Compile guard text via `parse2` on the dispair deployer
pub async fn parse_rainlang(
    client: &dyn ChainClient,
    text: &str,
    dispair: &Dispair,
) -> Result<Bytes, TaskError> {
    let data = IParserV2::parse2Call {
        data: Bytes::copy_from_slice(text.as_bytes()),
    }
    .abi_encode();
    let out = client
        .call(dispair.deployer, data.into())
        .await
        .map_err(TaskError::Parse)?;
    IParserV2::parse2Call::abi_decode_returns(&out).map_err(|e| TaskError::Decode(e.to_string()))
}

/// Render, compile and wrap a guard into a task for `dispair`
pub async fn build_task(
    client: &dyn ChainClient,
    guard: &Guard,
    minimum: U256,
    dispair: &Dispair,
) -> Result<TaskV1, TaskError> {
    let text = guard.render(minimum);
    let bytecode = parse_rainlang(client, &text, dispair).await?;
    debug!(
        "compiled guard: {} bytes of bytecode, minimum {}",
        bytecode.len(),
        format_units_18(minimum)
    );
    Ok(TaskV1 {
        evaluable: EvaluableV3 {
            interpreter: dispair.interpreter,
            store: dispair.store,
            bytecode,
        },
        signedContext: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::math::ONE18;
    use crate::rpc::RpcErrorKind;
    use alloy::sol_types::SolValue;

    fn dispair() -> Dispair {
        Dispair {
            interpreter: Address::repeat_byte(0xd1),
            store: Address::repeat_byte(0xd2),
            deployer: Address::repeat_byte(0xd3),
        }
    }

    #[test]
    fn test_bounty_guard_text() {
        let sender = Address::repeat_byte(0xab);
        let text = bounty_ensure_rainlang(
            ONE18 * U256::from(10),
            ONE18 * U256::from(20),
            ONE18 * U256::from(15),
            sender,
        );
        let expected = format!(
            r#"/* sender check */
:ensure(equal-to({} context<0 0>()) "unknown sender"),
/* bounty check */
total-bounty-eth: add(
    mul(10 context<1 0>())
    mul(20 context<1 1>())
),
:ensure(
    greater-than-or-equal-to(
        total-bounty-eth
        15
    )
    "minimum sender output"
);"#,
            sender
        );
        assert_eq!(text, expected);
        assert!(text.contains(&format!(
            r#":ensure(equal-to({} context<0 0>()) "unknown sender")"#,
            sender
        )));
    }

    #[test]
    fn test_fractional_prices_render_exactly() {
        // 0.000123 and 1.5
        let text = bounty_ensure_rainlang(
            U256::from(123_000_000_000_000u64),
            U256::from(1_500_000_000_000_000_000u64),
            U256::ZERO,
            Address::ZERO,
        );
        assert!(text.contains("mul(0.000123 context<1 0>())"));
        assert!(text.contains("mul(1.5 context<1 1>())"));
        assert!(text.contains("        0\n    )"));
        assert!(!text.contains("e-"));
    }

    #[test]
    fn test_withdraw_guard_uses_balance_delta() {
        let bot = Address::repeat_byte(0x01);
        let guard = Guard::Withdraw {
            bot,
            input_token: Address::repeat_byte(0x02),
            output_token: Address::repeat_byte(0x03),
            org_input_balance_18: ONE18 * U256::from(5),
            org_output_balance_18: ONE18,
            input_to_eth_price: ONE18 * U256::from(2),
            output_to_eth_price: ONE18 / U256::from(4),
            sender: bot,
        };
        let text = guard.render(ONE18 / U256::from(100));
        assert!(text.contains(&format!(
            "erc20-balance-of({} {})\n    5\n",
            Address::repeat_byte(0x02),
            bot
        )));
        assert!(text.contains("mul(input-bounty 2)"));
        assert!(text.contains("mul(output-bounty 0.25)"));
        assert!(text.contains("        0.01\n"));
    }

    #[tokio::test]
    async fn test_build_task_wraps_parsed_bytecode() {
        let deployer = dispair().deployer;
        let client = MockClient::new().with_call(move |to, data| {
            assert_eq!(to, deployer);
            assert_eq!(&data[..4], IParserV2::parse2Call::SELECTOR.as_slice());
            Ok(Bytes::from(vec![0xca, 0xfe]).abi_encode().into())
        });
        let guard = Guard::Bounty {
            input_to_eth_price: ONE18,
            output_to_eth_price: ONE18,
            sender: client.signer,
        };
        let task = build_task(&client, &guard, ONE18, &dispair()).await.unwrap();
        assert_eq!(task.evaluable.bytecode, Bytes::from(vec![0xca, 0xfe]));
        assert_eq!(task.evaluable.interpreter, dispair().interpreter);
        assert_eq!(task.evaluable.store, dispair().store);
        assert!(task.signedContext.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failures_are_fatal() {
        let client = MockClient::new().with_call(|_, _| {
            Err(RpcError::new(RpcErrorKind::ExecutionReverted, "execution reverted"))
        });
        let err = parse_rainlang(&client, "bad", &dispair()).await.unwrap_err();
        assert!(matches!(err, TaskError::Parse(_)));

        let client = MockClient::new().with_call(|_, _| Ok(Bytes::from(vec![0x01])));
        let err = parse_rainlang(&client, "x", &dispair()).await.unwrap_err();
        assert!(matches!(err, TaskError::Decode(_)));
    }
}
