//! Solidity ABI bindings for the yield manager, the rollup yield
//! extension and the Lido V3 contracts the automation talks to.

use alloy::sol;

sol!(
    #![sol(all_derives = true)]
    interface IYieldManager {
        struct YieldProviderData {
            uint8 yieldProviderVendor;
            bool isStakingPaused;
            bool isOssificationInitiated;
            bool isOssified;
            address primaryEntrypoint;
            address ossifiedEntrypoint;
            uint96 yieldProviderIndex;
            uint256 userFunds;
            uint256 yieldReportedCumulative;
            uint256 lstLiabilityPrincipal;
            uint256 lastReportedNegativeYield;
        }

        struct WithdrawalParams {
            bytes[] pubkeys;
            uint64[] amounts;
            address refundRecipient;
        }

        function L1_MESSAGE_SERVICE() external view returns (address);
        function isStakingPaused(address _yieldProvider) external view returns (bool);
        function isOssificationInitiated(address _yieldProvider) external view returns (bool);
        function isOssified(address _yieldProvider) external view returns (bool);
        function getYieldProviderData(address _yieldProvider) external view returns (YieldProviderData memory);
        function getTotalSystemBalance() external view returns (uint256);
        function getEffectiveTargetWithdrawalReserve() external view returns (uint256);
        function getTargetReserveDeficit() external view returns (uint256);
        function withdrawableValue(address _yieldProvider) external returns (uint256);

        function fundYieldProvider(address _yieldProvider, uint256 _amount) external;
        function reportYield(address _yieldProvider, address _l2YieldRecipient)
            external
            returns (uint256 newReportedYield, uint256 outstandingNegativeYield);
        function unstake(address _yieldProvider, bytes calldata _withdrawalParams) external payable;
        function safeAddToWithdrawalReserve(address _yieldProvider, uint256 _amount) external;
        function safeWithdrawFromYieldProvider(address _yieldProvider, uint256 _amount) external;
        function pauseStaking(address _yieldProvider) external;
        function unpauseStaking(address _yieldProvider) external;
        function progressPendingOssification(address _yieldProvider) external;

        event YieldProviderFunded(address indexed yieldProvider, uint256 amount);
        event NativeYieldReported(
            address indexed yieldProvider,
            address indexed l2YieldRecipient,
            uint256 yieldAmount,
            uint256 outstandingNegativeYield
        );
        event WithdrawalReserveAugmented(
            address indexed yieldProvider,
            uint256 requestedAmount,
            uint256 reserveIncrementAmount,
            uint256 lstPrincipalPaid
        );
    }
);

sol!(
    #![sol(all_derives = true)]
    interface ILineaRollupYieldExtension {
        function transferFundsForNativeYield(uint256 _amount) external;
    }
);

sol!(
    #![sol(all_derives = true)]
    interface IStakingVault {
        function calculateValidatorWithdrawalFee(uint256 _numberOfKeys) external view returns (uint256);
    }
);

sol!(
    #![sol(all_derives = true)]
    interface IVaultHub {
        struct Report {
            uint104 totalValue;
            int104 inOutDelta;
            uint48 timestamp;
        }

        function settleableLidoFeesValue(address _vault) external view returns (uint256);
        function latestReport(address _vault) external view returns (Report memory);
        function isReportFresh(address _vault) external view returns (bool);

        event LidoFeesSettled(
            address indexed vault,
            uint256 transferred,
            uint256 cumulativeLidoFees,
            uint256 settledLidoFees
        );
        event VaultRebalanced(address indexed vault, uint256 sharesBurned, uint256 etherWithdrawn);
    }
);

sol!(
    #![sol(all_derives = true)]
    interface IDashboard {
        function liabilityShares() external view returns (uint256);

        event FeeDisbursed(address indexed sender, uint256 fee);
    }
);

sol!(
    #![sol(all_derives = true)]
    interface ISTETH {
        function getPooledEthBySharesRoundUp(uint256 _sharesAmount) external view returns (uint256);
    }
);

sol!(
    #![sol(all_derives = true)]
    interface ILazyOracle {
        function latestReportData()
            external
            view
            returns (uint256 timestamp, uint256 refSlot, bytes32 treeRoot, string memory reportCid);
        function updateVaultData(
            address _vault,
            uint256 _totalValue,
            uint256 _cumulativeLidoFees,
            uint256 _liabilityShares,
            uint256 _maxLiabilityShares,
            uint256 _slashingReserve,
            bytes32[] calldata _proof
        ) external;

        event VaultsReportDataUpdated(
            uint256 indexed timestamp,
            uint256 indexed refSlot,
            bytes32 indexed root,
            string cid
        );
    }
);
