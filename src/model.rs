use serde::{Deserialize, Serialize};

/// A catalog entry. `movie_id` is the id of the upstream catalog (TMDB).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Movie {
    pub movie_id: u64,
    pub title: String,
    pub poster_path: String,
    pub vote_average: String,
    pub overview: String,
    pub release_date: String,
}

// The password hash stays out of templates, so storage goes through its own record.
#[derive(Serialize, Deserialize)]
struct StoredUser {
    name: Option<String>,
    email: String,
    password_hash: String,
}

/// An account. A user without a `name` is the signed-out user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct User {
    pub id: u64,
    pub name: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

impl User {
    pub fn is_authenticated(&self) -> bool {
        self.name.is_some()
    }

    pub(crate) fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(&StoredUser {
            name: self.name.clone(),
            email: self.email.clone(),
            password_hash: self.password_hash.clone(),
        })
    }

    pub(crate) fn from_bytes(id: u64, bytes: &[u8]) -> bincode::Result<User> {
        let stored: StoredUser = bincode::deserialize(bytes)?;
        Ok(User {
            id,
            name: stored.name,
            email: stored.email,
            password_hash: stored.password_hash,
        })
    }
}
