// SPDX-License-Identifier: GPL-3.0-or-later
pub mod parser;
pub mod writer;

pub use parser::{
    collect_nfo_files, parse_nfo_files, NfoActor, NfoCollection, NfoDocument, NfoFile,
    NfoParseOutcome,
};
pub use writer::{render_movie_nfo, write_movie_nfo};
