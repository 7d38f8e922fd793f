mod impls;
mod lotto;
mod util;

pub use self::lotto::*;
pub use util::*;
