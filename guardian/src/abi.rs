// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::abigen;

// Beacon chain deposit contract. Only the event is needed.
abigen!(
    DepositContract,
    r#"[
        event DepositEvent(bytes pubkey, bytes withdrawal_credentials, bytes amount, bytes signature, bytes index)
    ]"#,
);

abigen!(
    DepositSecurityModule,
    r#"[
        function getAttestMessagePrefix() external view returns (bytes32)
        function getPauseMessagePrefix() external view returns (bytes32)
        function getGuardians() external view returns (address[])
        function isDepositsPaused() external view returns (bool)
        function pauseDeposits(uint256 blockNumber, uint256 validatorIndex, uint256 slashAmount, bytes32 sigR, bytes32 sigVs) external
    ]"#,
);

// Protocol locator, the single address a guardian is configured with.
abigen!(
    ProtocolLocator,
    r#"[
        function depositContract() external view returns (address)
        function depositSecurityModule() external view returns (address)
    ]"#,
);
