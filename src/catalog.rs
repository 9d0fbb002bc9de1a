//! Persisted movie catalog.

use chrono::{NaiveDateTime, SubsecRound, Utc};

use crate::{api::MovieDto, record::FieldType, Database, Params, Repository, Result, Value};

pub const MOVIES_TABLE: &str = "Movies";
pub const METADATA_TABLE: &str = "Metadata";
pub const MOVIE_TYPES_TABLE: &str = "MovieTypes";
pub const MOVIE_IMAGES_TABLE: &str = "MovieImages";

/// Type names in the API's `typeNumber` order, starting at 1.
pub const MOVIE_TYPE_NAMES: [&str; 5] = ["movie", "tv-series", "cartoon", "anime", "animated-series"];

crate::record! {
    /// A title stored locally, keyed by row id and carrying its Kinopoisk id.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct Movie {
        pub id: i64,
        pub name_ru: Option<String>,
        pub name_en: Option<String>,
        pub kp_id: i64,
        pub year: Option<i32>,
        pub type_id: Option<i32>,
        pub rating_kp: Option<f64>,
        pub rating_imdb: Option<f64>,
        pub votes_kp: Option<i64>,
        pub votes_imdb: Option<i64>,
        pub last_update: NaiveDateTime,
        pub last_images_update: NaiveDateTime,
    }
}

crate::record! {
    #[derive(Clone, Debug, PartialEq)]
    pub struct MovieImage {
        pub id: i64,
        /// Row id of the owning [`Movie`].
        pub movie_id: i64,
        pub uri: String,
    }
}

crate::record! {
    #[derive(Clone, Debug, PartialEq)]
    pub struct Metadata {
        pub id: i64,
        pub last_update: NaiveDateTime,
        pub movie_count: i64,
    }
}

crate::record! {
    #[derive(Clone, Debug, PartialEq)]
    pub struct MovieType {
        pub id: i64,
        pub name: String,
    }
}

impl Movie {
    /// A new movie built from an API title. Timestamps are set on insert.
    pub fn from_dto(dto: &MovieDto) -> Self {
        let mut movie = Self {
            kp_id: dto.id,
            ..Self::default()
        };
        movie.apply(dto);
        movie
    }

    /// Overwrites the descriptive fields with the API's current values.
    pub fn apply(&mut self, dto: &MovieDto) {
        self.name_ru = dto.name.clone();
        self.name_en = dto.en_name.clone();
        self.year = dto.year;
        self.type_id = dto.type_number;
        self.rating_kp = dto.rating.kp;
        self.rating_imdb = dto.rating.imdb;
        self.votes_kp = dto.votes.kp;
        self.votes_imdb = dto.votes.imdb;
    }
}

/// Current time at the precision timestamps are stored with.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

/// Data service over the four catalog tables.
#[derive(Clone, Debug)]
pub struct Catalog {
    movies: Repository<Movie>,
    metadata: Repository<Metadata>,
    movie_types: Repository<MovieType>,
    images: Repository<MovieImage>,
}

impl Catalog {
    pub fn new(db: Database) -> Result<Self> {
        Ok(Self {
            movies: Repository::new(db.clone(), MOVIES_TABLE)?,
            metadata: Repository::new(db.clone(), METADATA_TABLE)?,
            movie_types: Repository::new(db.clone(), MOVIE_TYPES_TABLE)?,
            images: Repository::new(db, MOVIE_IMAGES_TABLE)?,
        })
    }

    /// Creates missing tables and seeds metadata and movie types.
    pub fn initialize(&self) -> Result<()> {
        self.movies.create_table(None)?;
        self.images.create_table(None)?;

        if self.metadata.create_table(None)? {
            self.metadata.insert(&Metadata {
                id: 0,
                last_update: now(),
                movie_count: 0,
            })?;
        }

        self.movie_types.create_table(None)?;
        if self.movie_types.count()? == 0 {
            let types: Vec<MovieType> = MOVIE_TYPE_NAMES
                .iter()
                .map(|name| MovieType {
                    id: 0,
                    name: (*name).to_owned(),
                })
                .collect();
            self.movie_types.insert_many(&types, true)?;
        }

        tracing::debug!(movies = self.movies.count()?, "catalog initialized");
        Ok(())
    }

    /// Stores a new movie, stamping both timestamps, and refreshes the
    /// movie count. Returns the movie with its assigned id.
    pub fn add_movie(&self, mut movie: Movie) -> Result<Movie> {
        movie.last_update = now();
        movie.last_images_update = NaiveDateTime::default();
        movie.id = self.movies.insert(&movie)?;
        self.refresh_movie_count()?;
        tracing::debug!(id = movie.id, kp_id = movie.kp_id, "movie added");
        Ok(movie)
    }

    /// Saves `movie` and stamps `last_update`. Returns `false` when no
    /// stored movie has its id.
    pub fn update_movie(&self, movie: &mut Movie) -> Result<bool> {
        if !self.movies.exists(movie.id)? {
            return Ok(false);
        }
        movie.last_update = now();
        self.movies.update(movie)
    }

    pub fn movie_by_kp_id(&self, kp_id: i64) -> Result<Option<Movie>> {
        let mut found = self.movies.get_where("\"kp_id\" = :kp_id LIMIT 1", [("kp_id", Value::integer(kp_id))])?;
        Ok(found.pop())
    }

    pub fn movies(&self) -> Result<Vec<Movie>> {
        self.movies.get_all()
    }

    pub fn movie_count(&self) -> Result<i64> {
        self.movies.count()
    }

    /// The movie whose details were refreshed longest ago.
    pub fn least_recently_updated_movie(&self) -> Result<Option<Movie>> {
        self.oldest_by("last_update")
    }

    /// The movie whose images were refreshed longest ago.
    pub fn least_recently_imaged_movie(&self) -> Result<Option<Movie>> {
        self.oldest_by("last_images_update")
    }

    fn oldest_by(&self, column: &str) -> Result<Option<Movie>> {
        let predicate = format!("1 = 1 ORDER BY \"{column}\" ASC, \"id\" ASC LIMIT 1");
        let mut found = self.movies.get_where(&predicate, ())?;
        Ok(found.pop())
    }

    /// Replaces the stored images of a movie and stamps
    /// `last_images_update`.
    ///
    /// Delete and insert are separate statements. Returns `None` when the
    /// movie does not exist.
    pub fn replace_movie_images(&self, movie_id: i64, uris: &[String]) -> Result<Option<usize>> {
        if !self.movies.exists(movie_id)? {
            return Ok(None);
        }

        let removed = self
            .images
            .delete_where("\"movie_id\" = ?", [Value::integer(movie_id)])?;
        let images: Vec<MovieImage> = uris
            .iter()
            .map(|uri| MovieImage {
                id: 0,
                movie_id,
                uri: uri.clone(),
            })
            .collect();
        let inserted = self.images.insert_many(&images, false)?;

        self.movies.execute(
            "UPDATE \"Movies\" SET \"last_images_update\" = :stamp WHERE \"id\" = :id",
            Params::named([("stamp", now().to_value()), ("id", Value::integer(movie_id))]),
        )?;
        tracing::debug!(movie_id, removed, inserted, "movie images replaced");
        Ok(Some(inserted))
    }

    pub fn movie_images(&self, movie_id: i64) -> Result<Vec<MovieImage>> {
        self.images
            .get_where("\"movie_id\" = ? ORDER BY \"id\"", [Value::integer(movie_id)])
    }

    pub fn movie_types(&self) -> Result<Vec<MovieType>> {
        self.movie_types.get_all()
    }

    pub fn metadata(&self) -> Result<Option<Metadata>> {
        Ok(self.metadata.get_all()?.into_iter().next())
    }

    /// Recounts movies and stamps the metadata row, creating it if needed.
    pub fn refresh_metadata(&self) -> Result<Metadata> {
        let movie_count = self.movies.count()?;
        match self.metadata()? {
            Some(mut metadata) => {
                metadata.last_update = now();
                metadata.movie_count = movie_count;
                self.metadata.update(&metadata)?;
                Ok(metadata)
            }
            None => {
                let mut metadata = Metadata {
                    id: 0,
                    last_update: now(),
                    movie_count,
                };
                metadata.id = self.metadata.insert(&metadata)?;
                Ok(metadata)
            }
        }
    }

    fn refresh_movie_count(&self) -> Result<()> {
        if let Some(mut metadata) = self.metadata()? {
            metadata.movie_count = self.movies.count()?;
            self.metadata.update(&metadata)?;
        }
        Ok(())
    }
}
