use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    // MiniMe checkpointed balance
    function balanceOfAt(address owner, uint256 blockNumber) external view returns (uint256);
    function balanceOf(address owner) external view returns (uint256);

    // Aragon TokenManager
    function token() external view returns (address);
}

pub fn decode_transfer_event(log: &Log) -> Result<Transfer, alloy::sol_types::Error> {
    let log_data = log.data();
    Transfer::decode_raw_log(log.topics(), &log_data.data)
}
