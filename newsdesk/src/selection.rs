//! Category-weighted choice of which fresh articles get analyzed.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::Article;
use crate::preferences::{Preferences, MAX_WEIGHT, MIN_WEIGHT};

pub const DEFAULT_TARGET: usize = 10;

/// Pick at most `target` distinct articles from `articles` (deduplicated,
/// newest first), biased towards heavily weighted categories.
///
/// Every weighted category gets `weight` slots in a shuffled lottery. Draws
/// cycle through the lottery popping the newest remaining article of the
/// drawn category, for at most twice the lottery length. Whatever is still
/// missing is filled from `articles` in order, so the result always has
/// `min(target, articles.len())` entries.
pub fn select_for_analysis<R: Rng + ?Sized>(
    articles: &[Article],
    prefs: &Preferences,
    target: usize,
    rng: &mut R,
) -> Vec<Article> {
    if target == 0 || articles.is_empty() {
        return Vec::new();
    }

    // Per-category queues of indices, newest first
    let mut queues: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (idx, article) in articles.iter().enumerate() {
        queues.entry(article.category.as_str()).or_default().push_back(idx);
    }

    let mut lottery: Vec<&str> = Vec::new();
    for cw in &prefs.categories {
        let copies = cw.weight.clamp(MIN_WEIGHT, MAX_WEIGHT) as usize;
        lottery.extend(std::iter::repeat(cw.category.as_str()).take(copies));
    }
    lottery.shuffle(rng);

    let mut picked: Vec<usize> = Vec::with_capacity(target);
    let mut taken: HashSet<usize> = HashSet::with_capacity(target);

    let max_attempts = lottery.len() * 2;
    let mut attempts = 0;
    while picked.len() < target && attempts < max_attempts {
        let category = lottery[attempts % lottery.len()];
        attempts += 1;
        if let Some(idx) = queues.get_mut(category).and_then(|q| q.pop_front()) {
            picked.push(idx);
            taken.insert(idx);
        }
    }

    let lottery_hits = picked.len();
    for idx in 0..articles.len() {
        if picked.len() >= target {
            break;
        }
        if taken.insert(idx) {
            picked.push(idx);
        }
    }

    tracing::debug!(
        lottery_hits,
        filled = picked.len() - lottery_hits,
        "Selected articles for analysis"
    );

    picked.into_iter().map(|idx| articles[idx].clone()).collect()
}
