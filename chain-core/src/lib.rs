pub mod block;
pub mod genesis;
pub mod mining;
pub mod state;
pub mod transaction;

pub use block::{is_block_hash_valid, Block, BlockHeader, BlockRecord, BLOCK_REWARD, MINING_DIFFICULTY};
pub use genesis::{
    block_db_file_path, genesis_file_path, init_data_dir_if_not_exists, load_genesis, Genesis,
    GENESIS_JSON,
};
pub use mining::{mine, PendingBlock};
pub use state::{blocks_after, State};
pub use transaction::{SignedTx, Tx, REWARD_DATA};
