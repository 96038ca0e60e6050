//! Compile-time ABI definitions for the protocol contracts via `sol!`.

#![allow(clippy::too_many_arguments)]

use alloy_sol_types::sol;

sol! {
    /// Entry point for every owner-initiated Trove change.
    interface IBorrowerOperations {
        function openTrove(
            uint256 _maxFeePercentage,
            uint256 _YUSDAmount,
            address _upperHint,
            address _lowerHint,
            address[] calldata _colls,
            uint256[] calldata _amounts
        ) external;

        function openTroveLeverUp(
            uint256 _maxFeePercentage,
            uint256 _YUSDAmount,
            address _upperHint,
            address _lowerHint,
            address[] calldata _colls,
            uint256[] calldata _amounts,
            uint256[] calldata _leverages,
            uint256[] calldata _maxSlippages
        ) external;

        function adjustTrove(
            address[] calldata _collsIn,
            uint256[] calldata _amountsIn,
            address[] calldata _collsOut,
            uint256[] calldata _amountsOut,
            uint256 _YUSDChange,
            bool _isDebtIncrease,
            address _upperHint,
            address _lowerHint,
            uint256 _maxFeePercentage
        ) external;

        function adjustTroveLeverUp(
            address[] calldata _collsIn,
            uint256[] calldata _amountsIn,
            uint256[] calldata _leverages,
            uint256[] calldata _maxSlippages,
            address[] calldata _collsOut,
            uint256[] calldata _amountsOut,
            uint256 _YUSDChange,
            bool _isDebtIncrease,
            address _upperHint,
            address _lowerHint,
            uint256 _maxFeePercentage
        ) external;

        function closeTrove() external;

        function closeTroveUnlever(
            address[] calldata _collsOut,
            uint256[] calldata _amountsOut,
            uint256[] calldata _maxSlippages
        ) external;

        event TroveUpdated(
            address indexed _borrower,
            uint256 _debt,
            address[] _tokens,
            uint256[] _amounts,
            uint8 _operation
        );

        event YUSDBorrowingFeePaid(address indexed _borrower, uint256 _YUSDFee);
    }

    /// Trove storage, redistribution accounting, redemption and liquidation.
    interface ITroveManager {
        function getTroveStatus(address _borrower) external view returns (uint256);
        function getTroveDebt(address _borrower) external view returns (uint256);
        function getTroveColls(address _borrower)
            external
            view
            returns (address[] memory tokens, uint256[] memory amounts);
        function getTroveStake(address _borrower, address _token) external view returns (uint256);
        function getRewardSnapshotColl(address _borrower, address _token) external view returns (uint256);
        function getRewardSnapshotYUSD(address _borrower, address _token) external view returns (uint256);
        function getL_Coll(address _token) external view returns (uint256);
        function getL_YUSD(address _token) external view returns (uint256);
        function getTroveOwnersCount() external view returns (uint256);
        function baseRate() external view returns (uint256);
        function lastFeeOperationTime() external view returns (uint256);

        function redeemCollateral(
            uint256 _YUSDAmount,
            uint256 _maxFeePercentage,
            address _firstRedemptionHint,
            address _upperPartialRedemptionHint,
            address _lowerPartialRedemptionHint,
            uint256 _partialRedemptionHintNICR,
            uint256 _maxIterations
        ) external;

        function liquidateTroves(uint256 _n) external;
        function batchLiquidateTroves(address[] calldata _troveArray, address _liquidator) external;

        event Redemption(
            uint256 _attemptedYUSDAmount,
            uint256 _actualYUSDAmount,
            uint256 _YUSDFee,
            address[] _tokens,
            uint256[] _amounts
        );

        event TroveLiquidated(address indexed _borrower, uint256 _debt, uint8 _operation);

        event Liquidation(
            uint256 _liquidatedAmount,
            uint256 _totalYUSDGasCompensation,
            address[] _totalCollTokens,
            uint256[] _totalCollAmounts
        );
    }

    /// Active and default pools share this read surface.
    interface IPool {
        function getYUSDDebt() external view returns (uint256);
        function getCollateral(address _collateral) external view returns (uint256);
    }

    interface IWhitelist {
        function getValidCollateral() external view returns (address[] memory);
        function getPrice(address _collateral) external view returns (uint256);
        function getDecimals(address _collateral) external view returns (uint8);
        function getSafetyRatio(address _collateral) external view returns (uint256);
        function getRecoveryRatio(address _collateral) external view returns (uint256);
        function isWrapped(address _collateral) external view returns (bool);
    }

    /// Doubly linked list of Troves ordered by descending nominal ratio.
    interface ISortedTroves {
        function getFirst() external view returns (address);
        function getLast() external view returns (address);
        function getSize() external view returns (uint256);
        function getNext(address _id) external view returns (address);
        function getPrev(address _id) external view returns (address);
        function findInsertPosition(uint256 _NICR, address _prevId, address _nextId)
            external
            view
            returns (address prev, address next);
    }

    interface IHintHelpers {
        function getApproxHint(uint256 _CR, uint256 _numTrials, uint256 _inputRandomSeed)
            external
            view
            returns (address hintAddress, uint256 diff, uint256 latestRandomSeed);

        function getRedemptionHints(uint256 _YUSDamount, uint256 _maxIterations)
            external
            view
            returns (
                address firstRedemptionHint,
                uint256 partialRedemptionHintNICR,
                uint256 truncatedYUSDamount
            );
    }
}
