//! Centralized Contract Definitions
//!
//! All Solidity interfaces the solver encodes calls for, defined with
//! alloy's `sol!` macro. Calldata is built with `SolCall::abi_encode` and
//! results decoded with `SolCall::abi_decode_returns`, so none of these need
//! `#[sol(rpc)]` instances; every chain call goes through `ChainClient`.
//!
//! Created: 2026-10-19

use alloy::sol;

// ── OrderBook v4 ──────────────────────────────────────────────────────

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct IO {
        address token;
        uint8 decimals;
        uint256 vaultId;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct EvaluableV3 {
        address interpreter;
        address store;
        bytes bytecode;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct OrderV3 {
        address owner;
        EvaluableV3 evaluable;
        IO[] validInputs;
        IO[] validOutputs;
        bytes32 nonce;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct SignedContextV1 {
        address signer;
        uint256[] context;
        bytes signature;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TakeOrderConfigV3 {
        OrderV3 order;
        uint256 inputIOIndex;
        uint256 outputIOIndex;
        SignedContextV1[] signedContext;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TakeOrdersConfigV3 {
        uint256 minimumInput;
        uint256 maximumInput;
        uint256 maximumIORatio;
        TakeOrderConfigV3[] orders;
        bytes data;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct ClearConfig {
        uint256 aliceInputIOIndex;
        uint256 aliceOutputIOIndex;
        uint256 bobInputIOIndex;
        uint256 bobOutputIOIndex;
        uint256 aliceBountyVaultId;
        uint256 bobBountyVaultId;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TaskV1 {
        EvaluableV3 evaluable;
        SignedContextV1[] signedContext;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Quote {
        OrderV3 order;
        uint256 inputIOIndex;
        uint256 outputIOIndex;
        SignedContextV1[] signedContext;
    }

    interface IOrderBookV4 {
        function takeOrders2(TakeOrdersConfigV3 calldata config) external returns (uint256 totalTakerInput, uint256 totalTakerOutput);
        function clear2(OrderV3 memory alice, OrderV3 memory bob, ClearConfig calldata clearConfig, SignedContextV1[] memory aliceSignedContext, SignedContextV1[] memory bobSignedContext) external;
        function withdraw2(address token, uint256 vaultId, uint256 targetAmount, TaskV1[] calldata tasks) external;
        function multicall(bytes[] calldata data) external returns (bytes[] memory results);
        function quote(Quote calldata quoteConfig) external view returns (bool exists, uint256 outputMax, uint256 ioRatio);
        function vaultBalance(address owner, address token, uint256 vaultId) external view returns (uint256 balance);
    }

    // Arb order takers share the orderbook structs, so they live in the same block
    interface IArbV4 {
        function arb3(address orderBook, TakeOrdersConfigV3 calldata takeOrders, TaskV1 calldata task) external payable;
    }
}

// ── Expression parser (dispair deployer) ─────────────────────────────

sol! {
    interface IParserV2 {
        function parse2(bytes memory data) external view returns (bytes memory bytecode);
    }
}

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

// ── Multicall3 ───────────────────────────────────────────────────────

sol! {
    #[derive(Debug)]
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    #[derive(Debug)]
    struct Result3 {
        bool success;
        bytes returnData;
    }

    interface IMulticall3 {
        function aggregate3(Call3[] calldata calls) external payable returns (Result3[] memory returnData);
    }
}
