use crate::fts_tree::FTSExt;
use crate::model::*;
use sled::transaction::{abort, ConflictableTransactionResult, TransactionError, Transactional};
use std::cmp::Ordering;
use std::convert::TryInto;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("corrupt index: {0}")]
    Corrupt(&'static str),
}

pub type DbResult<T> = Result<T, DbError>;

fn serialize_id(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> DbResult<u64> {
    id.as_ref()
        .try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| DbError::Corrupt("id is not 8 bytes long"))
}

pub trait UserDb {
    /// Returns `None` if the email is already taken.
    fn add_user(&self, user: &User) -> DbResult<Option<u64>>;
    fn get_user(&self, id: u64) -> DbResult<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>>;
}

pub trait MovieDb {
    fn put_movie(&self, movie: &Movie) -> DbResult<()>;
    fn get_movie(&self, id: u64) -> DbResult<Option<Movie>>;
    fn movies(&self) -> DbResult<Vec<Movie>>;
    /// Best match first.
    fn search_movies(&self, query: &str) -> DbResult<Vec<Movie>>;
}

pub trait FavoritesDb {
    fn get_favorites(&self, user_id: u64) -> DbResult<Vec<Movie>>;
    /// Atomically replaces the favorites of `user_id` with `f` applied to
    /// the stored list, and returns the new list.
    fn update_favorites<F>(&self, user_id: u64, f: F) -> DbResult<Vec<Movie>>
    where
        F: Fn(Vec<Movie>) -> Vec<Movie>;
}

const USERS: &[u8] = b"users";
const USERS_EMAIL: &[u8] = b"USERS_EMAIL";
const MOVIES: &[u8] = b"movies";
const MOVIES_FTS: &[u8] = b"MOVIES_FTS";
const FAVORITES: &[u8] = b"favorites";

fn searchable_text(movie: &Movie) -> String {
    format!("{} {}", movie.title, movie.overview)
}

impl UserDb for sled::Db {
    fn add_user(&self, user: &User) -> DbResult<Option<u64>> {
        let users = self.open_tree(USERS)?;
        let users_email = self.open_tree(USERS_EMAIL)?;
        let id = self.generate_id()?;
        let data = user.to_bytes()?;
        if let Err(err) = (&users, &users_email).transaction(|(users, users_email)| {
            users.insert(&serialize_id(id), data.as_slice())?;
            if users_email
                .insert(user.email.as_bytes(), &serialize_id(id))?
                .is_some()
            {
                sled::transaction::abort(())?;
            }
            Ok(())
        }) {
            match err {
                TransactionError::Storage(e) => return Err(e.into()),
                TransactionError::Abort(()) => return Ok(None),
            };
        }
        Ok(Some(id))
    }

    fn get_user(&self, id: u64) -> DbResult<Option<User>> {
        let users = self.open_tree(USERS)?;
        match users.get(serialize_id(id))? {
            Some(data) => Ok(Some(User::from_bytes(id, &data)?)),
            None => Ok(None),
        }
    }

    fn get_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let users_email = self.open_tree(USERS_EMAIL)?;
        match users_email.get(email)? {
            Some(id) => {
                let id = deserialize_id(id)?;
                self.get_user(id)?
                    .ok_or(DbError::Corrupt("email index points to a missing user"))
                    .map(Some)
            }
            None => Ok(None),
        }
    }
}

impl MovieDb for sled::Db {
    fn put_movie(&self, movie: &Movie) -> DbResult<()> {
        let movies = self.open_tree(MOVIES)?;
        let fts = self.open_fts(MOVIES_FTS)?;
        let key = serialize_id(movie.movie_id);
        let data = bincode::serialize(movie)?;
        let old: Option<Movie> = match movies.get(key)? {
            Some(old) => Some(bincode::deserialize(&old)?),
            None => None,
        };
        // The catalog row only changes once the index holds the new text.
        if let Some(old) = &old {
            fts.remove(key, &searchable_text(old))?;
        }
        if let Err(err) = fts.insert(key, &searchable_text(movie)) {
            if let Some(old) = &old {
                fts.insert(key, &searchable_text(old))?;
            }
            return Err(err.into());
        }
        if let Err(err) = movies.insert(key, data) {
            fts.remove(key, &searchable_text(movie))?;
            if let Some(old) = &old {
                fts.insert(key, &searchable_text(old))?;
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn get_movie(&self, id: u64) -> DbResult<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        match movies.get(serialize_id(id))? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn movies(&self) -> DbResult<Vec<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        let mut ret: Vec<Movie> = movies
            .iter()
            .values()
            .map(|data| Ok(bincode::deserialize(&data?)?))
            .collect::<DbResult<_>>()?;
        // Keys are little endian, so tree order is not id order.
        ret.sort_by_key(|movie| movie.movie_id);
        Ok(ret)
    }

    fn search_movies(&self, query: &str) -> DbResult<Vec<Movie>> {
        let fts = self.open_fts(MOVIES_FTS)?;
        let mut scored = fts
            .query(query)?
            .into_iter()
            .map(|(key, score)| Ok((deserialize_id(key)?, score)))
            .collect::<DbResult<Vec<(u64, f32)>>>()?;
        scored.sort_by(|(id_a, score_a), (id_b, score_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then(id_a.cmp(id_b))
        });
        scored
            .into_iter()
            .map(|(id, _)| {
                self.get_movie(id)?
                    .ok_or(DbError::Corrupt("search index points to a missing movie"))
            })
            .collect()
    }
}

impl FavoritesDb for sled::Db {
    fn get_favorites(&self, user_id: u64) -> DbResult<Vec<Movie>> {
        let favorites = self.open_tree(FAVORITES)?;
        match favorites.get(serialize_id(user_id))? {
            Some(data) => Ok(bincode::deserialize(&data)?),
            None => Ok(Vec::new()),
        }
    }

    fn update_favorites<F>(&self, user_id: u64, f: F) -> DbResult<Vec<Movie>>
    where
        F: Fn(Vec<Movie>) -> Vec<Movie>,
    {
        let favorites = self.open_tree(FAVORITES)?;
        let key = serialize_id(user_id);
        favorites
            .transaction(|favorites| -> ConflictableTransactionResult<Vec<Movie>, DbError> {
                let current: Vec<Movie> = match favorites.get(key)? {
                    Some(data) => bincode::deserialize(&data).or_else(|e| abort(DbError::from(e)))?,
                    None => Vec::new(),
                };
                let updated = f(current);
                let data = bincode::serialize(&updated).or_else(|e| abort(DbError::from(e)))?;
                favorites.insert(&key, data)?;
                Ok(updated)
            })
            .map_err(|err| match err {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => e.into(),
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn movie(movie_id: u64, title: &str, overview: &str) -> Movie {
        Movie {
            movie_id,
            title: title.to_owned(),
            poster_path: format!("/{}.jpg", movie_id),
            vote_average: "7.5".to_owned(),
            overview: overview.to_owned(),
            release_date: "1994-09-10".to_owned(),
        }
    }

    pub(crate) fn user(name: &str, email: &str) -> User {
        User {
            id: 0,
            name: Some(name.to_owned()),
            email: email.to_owned(),
            password_hash: "hash".to_owned(),
        }
    }

    fn db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn add_and_get_user() {
        let db = db();
        let id = db.add_user(&user("tim", "tim@example.com")).unwrap().unwrap();
        let stored = db.get_user(id).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.name.as_deref(), Some("tim"));
        assert_eq!(stored.password_hash, "hash");
        assert_eq!(db.get_user_by_email("tim@example.com").unwrap(), Some(stored));
        assert_eq!(db.get_user_by_email("nobody@example.com").unwrap(), None);
    }

    #[test]
    fn duplicate_email() {
        let db = db();
        assert!(db.add_user(&user("tim", "tim@example.com")).unwrap().is_some());
        assert!(db.add_user(&user("tom", "tim@example.com")).unwrap().is_none());
    }

    #[test]
    fn movies_in_id_order() {
        let db = db();
        db.put_movie(&movie(300, "Heat", "")).unwrap();
        db.put_movie(&movie(2, "Alien", "")).unwrap();
        let ids: Vec<u64> = db.movies().unwrap().iter().map(|m| m.movie_id).collect();
        assert_eq!(ids, vec![2, 300]);
        assert_eq!(db.get_movie(2).unwrap().unwrap().title, "Alien");
        assert_eq!(db.get_movie(3).unwrap(), None);
    }

    #[test]
    fn search() {
        let db = db();
        db.put_movie(&movie(1, "Pulp Fiction", "Two hitmen and a boxer")).unwrap();
        db.put_movie(&movie(2, "Fight Club", "An insomniac and a soap maker")).unwrap();
        db.put_movie(&movie(3, "Pulp", "A crime writer")).unwrap();
        let titles: Vec<String> = db
            .search_movies("pulp")
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Pulp".to_owned(), "Pulp Fiction".to_owned()]);
        assert!(db.search_movies("zombies").unwrap().is_empty());
    }

    #[test]
    fn replacing_a_movie_reindexes_it() {
        let db = db();
        db.put_movie(&movie(1, "Working Title", "")).unwrap();
        db.put_movie(&movie(1, "Final Title", "")).unwrap();
        assert!(db.search_movies("working").unwrap().is_empty());
        assert_eq!(db.search_movies("final").unwrap().len(), 1);
        assert_eq!(db.movies().unwrap().len(), 1);
    }

    #[test]
    fn favorites() {
        let db = db();
        assert!(db.get_favorites(7).unwrap().is_empty());
        let movies = vec![movie(2, "Alien", ""), movie(1, "Heat", "")];
        assert_eq!(db.update_favorites(7, |_| movies.clone()).unwrap(), movies);
        assert_eq!(db.get_favorites(7).unwrap(), movies);
        assert!(db.get_favorites(8).unwrap().is_empty());
    }

    #[test]
    fn update_sees_the_stored_list() {
        let db = db();
        db.update_favorites(7, |mut list| {
            list.push(movie(1, "Heat", ""));
            list
        })
        .unwrap();
        let updated = db
            .update_favorites(7, |mut list| {
                list.push(movie(2, "Alien", ""));
                list
            })
            .unwrap();
        assert_eq!(updated, vec![movie(1, "Heat", ""), movie(2, "Alien", "")]);
    }

    #[test]
    fn concurrent_updates_keep_every_favorite() {
        let db = db();
        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.update_favorites(7, |mut list| {
                        list.push(movie(id, "m", ""));
                        list
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut ids: Vec<u64> = db
            .get_favorites(7)
            .unwrap()
            .iter()
            .map(|m| m.movie_id)
            .collect();
        ids.sort();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn failed_index_update_leaves_catalog_untouched() {
        let db = db();
        db.open_fts(MOVIES_FTS)
            .unwrap()
            .insert(serialize_id(1), "stale text")
            .unwrap();
        assert!(db.put_movie(&movie(1, "Heat", "")).is_err());
        assert_eq!(db.get_movie(1).unwrap(), None);
        assert!(db.search_movies("heat").unwrap().is_empty());
    }
}
