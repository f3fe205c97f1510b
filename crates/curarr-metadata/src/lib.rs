// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod fanarttv;
pub mod tmdb;

pub use error::{ProviderCallError, Result};
pub use fanarttv::{FanartImage, FanartTvClient, MovieArtwork};
pub use tmdb::{
    TmdbCastMember, TmdbClient, TmdbCollection, TmdbImage, TmdbMovie, TmdbVideo,
};
