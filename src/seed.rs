use crate::database::{DbResult, MovieDb};
use crate::model::Movie;

fn movie(
    movie_id: u64,
    title: &str,
    poster_path: &str,
    vote_average: &str,
    release_date: &str,
    overview: &str,
) -> Movie {
    Movie {
        movie_id,
        title: title.to_owned(),
        poster_path: poster_path.to_owned(),
        vote_average: vote_average.to_owned(),
        overview: overview.to_owned(),
        release_date: release_date.to_owned(),
    }
}

pub fn demo_catalog() -> Vec<Movie> {
    vec![
        movie(
            680,
            "Pulp Fiction",
            "/d5iIlFn5s0ImszYzBPb8JPIfbXD.jpg",
            "8.5",
            "1994-09-10",
            "A burger-loving hit man, his philosophical partner, a drug-addled gangster's moll \
             and a washed-up boxer converge in this sprawling crime caper.",
        ),
        movie(
            550,
            "Fight Club",
            "/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg",
            "8.4",
            "1999-10-15",
            "A ticking-time-bomb insomniac and a slippery soap salesman channel primal male \
             aggression into a shocking new form of therapy.",
        ),
        movie(
            949,
            "Heat",
            "/umSVjVdbVwtx5ryCA2QXL44Durm.jpg",
            "7.9",
            "1995-12-15",
            "Obsessive master thief Neil McCauley leads a top-notch crew on various daring \
             heists throughout Los Angeles while a mentally unstable detective tracks him.",
        ),
        movie(
            348,
            "Alien",
            "/vfrQk5IPloGg1v9Rzbh2Eg3VGyM.jpg",
            "8.2",
            "1979-05-25",
            "During its return to the earth, commercial spaceship Nostromo intercepts a \
             distress signal from a distant planet.",
        ),
        movie(
            78,
            "Blade Runner",
            "/63N9uy8nd9j7Eog2axPQ8lbr3Wj.jpg",
            "7.9",
            "1982-06-25",
            "In the smog-choked dystopian Los Angeles of 2019, blade runner Rick Deckard is \
             called out of retirement to terminate a quartet of replicants.",
        ),
    ]
}

pub fn seed(db: &sled::Db) -> DbResult<usize> {
    let catalog = demo_catalog();
    for movie in &catalog {
        db.put_movie(movie)?;
    }
    Ok(catalog.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_twice_keeps_one_copy() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        assert_eq!(seed(&db).unwrap(), 5);
        seed(&db).unwrap();
        assert_eq!(db.movies().unwrap().len(), 5);
        assert_eq!(db.search_movies("replicants").unwrap()[0].title, "Blade Runner");
    }
}
