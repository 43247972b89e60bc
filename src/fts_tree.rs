use sled::transaction::{abort, ConflictableTransactionResult, TransactionError};
use sled::{IVec, Transactional};
use std::collections::HashMap;
use std::convert::TryInto;
use unic_ucd_category::GeneralCategory;

pub fn tokens_iter(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c| !is_token_character(c)).filter(|t| !t.is_empty())
}

pub fn is_token_character(c: char) -> bool {
    let category = GeneralCategory::of(c);
    category.is_number() || category.is_letter() || category == GeneralCategory::PrivateUse
}

const FTS_FREQUENCY_POSTFIX: &[u8] = b"_frequency";
const FTS_TOKENS_POSTFIX: &[u8] = b"_tokens";
const FTS_DOCLEN_POSTFIX: &[u8] = b"_doclen";

// Holds the corpus-wide document length in `doclen` and the document count in `tokens`.
const TOTAL: &[u8] = b"";

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Full-text index with BM25 ranking, stored in three sled trees.
///
/// * `tokens`: token -> (number of occurrences, token id)
/// * `frequency`: token id ++ document key -> occurrences in that document
/// * `doclen`: document key -> number of tokens in that document
pub struct FTSTree {
    frequency: sled::Tree,
    tokens: sled::Tree,
    doclen: sled::Tree,
}

pub trait FTSExt {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree>;
}

impl FTSExt for sled::Db {
    fn open_fts<V: AsRef<[u8]>>(&self, name: V) -> sled::Result<FTSTree> {
        let tree = |postfix: &[u8]| {
            let mut tree_name = name.as_ref().to_vec();
            tree_name.extend_from_slice(postfix);
            self.open_tree(tree_name)
        };
        Ok(FTSTree {
            frequency: tree(FTS_FREQUENCY_POSTFIX)?,
            tokens: tree(FTS_TOKENS_POSTFIX)?,
            doclen: tree(FTS_DOCLEN_POSTFIX)?,
        })
    }
}

fn malformed() -> sled::Error {
    sled::Error::Unsupported("malformed full-text index entry".to_owned())
}

fn mismatch() -> sled::Error {
    sled::Error::Unsupported("value does not match inserted document".to_owned())
}

fn read_u32(bytes: &[u8]) -> sled::Result<u32> {
    bytes.try_into().map(u32::from_le_bytes).map_err(|_| malformed())
}

fn read_u64(bytes: &[u8]) -> sled::Result<u64> {
    bytes.try_into().map(u64::from_le_bytes).map_err(|_| malformed())
}

fn read_token(entry: &[u8]) -> sled::Result<(u32, u64)> {
    if entry.len() != 12 {
        return Err(malformed());
    }
    Ok((read_u32(&entry[0..4])?, read_u64(&entry[4..12])?))
}

fn token_entry(count: u32, id: u64) -> Vec<u8> {
    let mut entry = count.to_le_bytes().to_vec();
    entry.extend_from_slice(&id.to_le_bytes());
    entry
}

fn frequency_key(id: u64, key: &[u8]) -> Vec<u8> {
    let mut frequency_key = id.to_le_bytes().to_vec();
    frequency_key.extend_from_slice(key);
    frequency_key
}

/// Lowercased token counts and the total token count of `value`.
fn token_counts(value: &str) -> (HashMap<String, u32>, u32) {
    let mut counts = HashMap::new();
    let mut total = 0u32;
    for token in tokens_iter(value) {
        *counts.entry(token.to_lowercase()).or_insert(0) += 1;
        total += 1;
    }
    (counts, total)
}

impl FTSTree {
    pub fn insert<K: AsRef<[u8]>>(&self, key: K, value: &str) -> sled::Result<()> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(sled::Error::Unsupported(
                "the empty key is reserved".to_owned(),
            ));
        }
        let (mut counts, total_count) = token_counts(value);
        counts.insert(String::new(), 1);
        (&self.frequency, &self.tokens, &self.doclen)
            .transaction(
                |(frequency, tokens, doclen)| -> ConflictableTransactionResult<(), ()> {
                    if doclen
                        .insert(key, total_count.to_le_bytes().as_ref())?
                        .is_some()
                    {
                        return Err(sled::Error::Unsupported(
                            "Updates to FTSTree are not allowed".to_owned(),
                        )
                        .into());
                    }
                    let old_total_dl = match doclen.get(TOTAL)? {
                        Some(dl) => read_u32(&dl)?,
                        None => 0,
                    };
                    doclen.insert(TOTAL, (old_total_dl + total_count).to_le_bytes().as_ref())?;
                    for (token, count) in counts.iter() {
                        let (old_count, id) = match tokens.get(token.as_bytes())? {
                            Some(old) => read_token(&old)?,
                            None => (0, tokens.generate_id()?),
                        };
                        frequency.insert(frequency_key(id, key), count.to_le_bytes().as_ref())?;
                        tokens.insert(token.as_bytes(), token_entry(old_count + count, id))?;
                    }
                    Ok(())
                },
            )
            .map_err(|e| match e {
                TransactionError::Storage(s) => s,
                TransactionError::Abort(()) => malformed(),
            })
    }

    /// Undoes an `insert` of the same key and value. Returns `false` if the
    /// key was never indexed.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K, value: &str) -> sled::Result<bool> {
        let key = key.as_ref();
        let (mut counts, total_count) = token_counts(value);
        counts.insert(String::new(), 1);
        let result = (&self.frequency, &self.tokens, &self.doclen).transaction(
            |(frequency, tokens, doclen)| -> ConflictableTransactionResult<(), ()> {
                let old_total_count = match doclen.remove(key)? {
                    Some(count) => count,
                    None => return abort(()),
                };
                if old_total_count.as_ref() != total_count.to_le_bytes().as_ref() {
                    return Err(mismatch().into());
                }
                let old_total_dl = match doclen.get(TOTAL)? {
                    Some(dl) => read_u32(&dl)?,
                    None => 0,
                };
                let total_dl = old_total_dl.checked_sub(total_count).ok_or_else(malformed)?;
                doclen.insert(TOTAL, total_dl.to_le_bytes().as_ref())?;
                for (token, count) in counts.iter() {
                    let (old_count, id) = match tokens.get(token.as_bytes())? {
                        Some(old) => read_token(&old)?,
                        None => return Err(mismatch().into()),
                    };
                    let old_frequency = frequency
                        .remove(frequency_key(id, key))?
                        .ok_or_else(mismatch)?;
                    if old_frequency.as_ref() != count.to_le_bytes().as_ref() {
                        return Err(mismatch().into());
                    }
                    let new_count = old_count.checked_sub(*count).ok_or_else(malformed)?;
                    tokens.insert(token.as_bytes(), token_entry(new_count, id))?;
                }
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(true),
            Err(TransactionError::Abort(())) => Ok(false),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    /// BM25 score of every document matching at least one token of `value`.
    pub fn query(&self, value: &str) -> sled::Result<HashMap<IVec, f32>> {
        let (token_counts, _) = token_counts(value);
        let mut ret = HashMap::new();

        let num_documents = match self.tokens.get(TOTAL)? {
            Some(data) => read_token(&data)?.0,
            None => 0,
        };
        if num_documents == 0 {
            return Ok(ret);
        }
        let total_dl = match self.doclen.get(TOTAL)? {
            Some(dl) => read_u32(&dl)?,
            None => 0,
        };
        let avgdl = total_dl as f32 / num_documents as f32;

        for (token, count) in token_counts {
            let (total_count, id) = match self.tokens.get(token.as_bytes())? {
                Some(token_data) => read_token(&token_data)?,
                None => continue,
            };
            let idf = ((num_documents as f32 - total_count as f32 + 0.5)
                / (total_count as f32 + 0.5)
                + 1.0)
                .ln();
            for frequency_data_result in self.frequency.scan_prefix(id.to_le_bytes()) {
                let (id_and_key, frequency_data) = frequency_data_result?;
                let frequency = read_u32(&frequency_data)? as f32;
                let key = IVec::from(&id_and_key[8..]);
                let dl = match self.doclen.get(&key)? {
                    Some(dl) => read_u32(&dl)?,
                    None => 0,
                };
                let bm25 = idf * frequency * (K1 + 1.0)
                    / (frequency + K1 * (1.0 - B + B * dl as f32 / avgdl));
                *ret.entry(key).or_insert(0.0) += bm25 * count as f32;
            }
        }

        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(res: &HashMap<IVec, f32>, key: &[u8]) -> Option<f32> {
        res.get(&IVec::from(key)).copied()
    }

    fn assert_close(actual: Option<f32>, expected: f32) {
        let actual = actual.expect("document missing from results");
        assert!(
            (actual - expected).abs() < 1e-5,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn query() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        fts_tree.insert(b"k1", "foo bar").unwrap();
        fts_tree.insert(b"k2", "foo").unwrap();
        fts_tree.insert(b"k3", "bar").unwrap();
        let res = fts_tree.query("foo").unwrap();
        assert_close(score(&res, b"k1"), 0.3901917);
        assert_close(score(&res, b"k2"), 0.52354836);
        assert_eq!(score(&res, b"k3"), None);
        let res = fts_tree.query("foo bar").unwrap();
        assert_close(score(&res, b"k1"), 0.7803834);
        assert_close(score(&res, b"k2"), 0.52354836);
        assert_close(score(&res, b"k3"), 0.52354836);
    }

    #[test]
    fn query_ignores_case() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        fts_tree.insert(b"k1", "Pulp Fiction").unwrap();
        let res = fts_tree.query("PULP").unwrap();
        assert!(score(&res, b"k1").unwrap() > 0.0);
    }

    #[test]
    fn empty_index() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        assert!(fts_tree.query("anything").unwrap().is_empty());
    }

    #[test]
    fn reserved_key() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        assert!(fts_tree.insert(b"", "foo").is_err());
    }

    #[test]
    fn duplicate_insert() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        fts_tree.insert(b"k1", "foo").unwrap();
        assert!(fts_tree.insert(b"k1", "foo").is_err());
    }

    #[test]
    fn delete() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        fts_tree.insert(b"k1", "foo bar").unwrap();
        fts_tree.insert(b"k2", "foo").unwrap();
        let cs = db.checksum().unwrap();
        fts_tree.insert(b"k3", "bar").unwrap();
        assert!(fts_tree.remove(b"k3", "bar").unwrap());
        assert_eq!(cs, db.checksum().unwrap());
    }

    #[test]
    fn delete_missing() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let fts_tree = db.open_fts("test").unwrap();
        assert!(!fts_tree.remove(b"k1", "foo").unwrap());
    }
}
