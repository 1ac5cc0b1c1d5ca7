pub mod bitboard;
pub mod error;
pub mod eval;
pub mod movegen;
pub mod position;
pub mod search;
pub mod tb;
pub mod text;
pub mod time_management;
pub mod types;

pub use error::{ChessError, NotImplementedError};
pub use eval::{EvalTables, Evaluator};
pub use movegen::MoveList;
pub use position::{FenError, Position};
pub use search::{Search, SearchTables, TranspositionTable};
pub use types::{Color, Move, Piece, PieceKind, Square, UndoInfo};
