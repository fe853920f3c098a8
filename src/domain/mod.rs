mod card;
mod clock;
mod ledger;
mod money;
mod team;
mod transaction;
mod user;

pub use card::*;
pub use clock::*;
pub use ledger::*;
pub use money::*;
pub use team::*;
pub use transaction::*;
pub use user::*;
