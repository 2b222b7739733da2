//! Listing title analysis for catalog matching
//!
//! Marketplace titles are padded with bracketed tags, shipping notices and
//! auction jargon. Cleaning removes those; brands, model numbers and keywords
//! are then read from what remains.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::infrastructure::parsing::text::{collapse_whitespace, normalize_width};

/// 【新品】, [送料無料], ［美品］, 《限定》, ★激安★ and similar tags, content included
static BRACKETED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"【[^】]*】|\[[^\]]*\]|［[^］]*］|《[^》]*》|〈[^〉]*〉|★[^★]*★|☆[^☆]*☆").expect("valid bracket regex")
});

static MODEL_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*").expect("valid model regex"));

/// Capacities and sizes look like model numbers but are not
static UNIT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d+(?:\.\d+)?(?:gb|tb|mb|kb|mm|cm|m|kg|g|ml|l|w|mah|hz|ghz|mhz|inch|in|p|k|v|mp)$")
        .expect("valid unit regex")
});

static TOKEN_SPLIT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s/・、,，。()（）「」『』!！?？:：;；|｜+＋&＆~〜]+").expect("valid split regex"));

/// Condition words, shipping notices and auction jargon
const NOISE_WORDS: &[&str] = &[
    "送料無料",
    "送料込み",
    "送料込",
    "匿名配送",
    "即日発送",
    "即決",
    "1円スタート",
    "1円〜",
    "新品未開封",
    "新品未使用",
    "未開封",
    "未使用",
    "新品",
    "中古",
    "極美品",
    "美品",
    "ジャンク",
    "動作確認済み",
    "動作品",
    "訳あり",
    "激安",
    "限定",
    "正規品",
    "希少",
    "レア",
    "値下げ",
    "本日限り",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "of", "in", "a", "an", "to", "set", "new", "used", "free", "shipping",
    "セット", "付き", "付属", "あり", "なし", "用", "など", "まとめ", "その他",
];

/// Canonical brand and the spellings it appears under
const BRANDS: &[(&str, &[&str])] = &[
    ("Apple", &["apple", "アップル"]),
    ("Canon", &["canon", "キヤノン", "キャノン"]),
    ("Sony", &["sony", "ソニー"]),
    ("Nikon", &["nikon", "ニコン"]),
    ("Fujifilm", &["fujifilm", "富士フイルム", "富士フィルム", "フジフイルム"]),
    ("Olympus", &["olympus", "オリンパス"]),
    ("Panasonic", &["panasonic", "パナソニック"]),
    ("Pentax", &["pentax", "ペンタックス"]),
    ("Ricoh", &["ricoh", "リコー"]),
    ("Leica", &["leica", "ライカ"]),
    ("Sigma", &["sigma", "シグマ"]),
    ("Tamron", &["tamron", "タムロン"]),
    ("Nintendo", &["nintendo", "任天堂", "ニンテンドー"]),
    ("Microsoft", &["microsoft", "マイクロソフト"]),
    ("Samsung", &["samsung", "サムスン"]),
    ("Google", &["google", "グーグル"]),
    ("Sharp", &["sharp", "シャープ"]),
    ("Dyson", &["dyson", "ダイソン"]),
    ("Bose", &["bose", "ボーズ"]),
    ("Casio", &["casio", "カシオ"]),
    ("Seiko", &["seiko", "セイコー"]),
    ("Citizen", &["citizen", "シチズン"]),
    ("Rolex", &["rolex", "ロレックス"]),
    ("Omega", &["omega", "オメガ"]),
    ("Louis Vuitton", &["louis vuitton", "ルイヴィトン", "ルイ・ヴィトン", "ヴィトン"]),
    ("Chanel", &["chanel", "シャネル"]),
    ("Gucci", &["gucci", "グッチ"]),
    ("Hermes", &["hermes", "hermès", "エルメス"]),
    ("Prada", &["prada", "プラダ"]),
    ("Coach", &["coach", "コーチ"]),
    ("Nike", &["nike", "ナイキ"]),
    ("Adidas", &["adidas", "アディダス"]),
    ("Supreme", &["supreme", "シュプリーム"]),
    ("Bandai", &["bandai", "バンダイ"]),
    ("Lego", &["lego", "レゴ"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleAnalysis {
    pub cleaned: String,
    pub brand: Option<&'static str>,
    pub models: Vec<String>,
    /// Ranked by length, capped
    pub keywords: Vec<String>,
}

impl TitleAnalysis {
    pub fn new(title: &str, max_keywords: usize) -> Self {
        let cleaned = clean_title(title);
        let mut keywords = keyword_set(&cleaned);
        keywords.truncate(max_keywords);

        Self {
            brand: detect_brand(&cleaned),
            models: model_numbers(&cleaned),
            keywords,
            cleaned,
        }
    }

    /// Up to three catalog queries: top keyword, top two keywords, brand with model
    pub fn queries(&self) -> Vec<String> {
        let mut queries = Vec::new();
        if let Some(first) = self.keywords.first() {
            queries.push(first.clone());
        }
        if self.keywords.len() >= 2 {
            queries.push(format!("{} {}", self.keywords[0], self.keywords[1]));
        }
        if let (Some(brand), Some(model)) = (self.brand, self.models.first()) {
            queries.push(format!("{brand} {model}"));
        }

        let mut seen = HashSet::new();
        queries.retain(|query| seen.insert(query.to_lowercase()));
        queries
    }
}

/// Normalize width, drop bracketed tags and noise words, collapse whitespace
pub fn clean_title(title: &str) -> String {
    let normalized = normalize_width(title);
    let without_tags = BRACKETED_REGEX.replace_all(&normalized, " ");
    let without_noise = NOISE_WORDS
        .iter()
        .fold(without_tags.into_owned(), |text, word| text.replace(word, " "));
    collapse_whitespace(&without_noise)
}

/// First known brand mentioned in the text
pub fn detect_brand(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    BRANDS
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|alias| mentions(&lower, alias)))
        .map(|(brand, _)| *brand)
}

/// ASCII aliases must stand alone; Japanese aliases match anywhere
fn mentions(lower: &str, alias: &str) -> bool {
    if !alias.is_ascii() {
        return lower.contains(alias);
    }
    lower.match_indices(alias).any(|(start, matched)| {
        let before = lower[..start].chars().next_back();
        let after = lower[start + matched.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Alphanumeric tokens (hyphens allowed) with both letters and digits, units excluded
pub fn model_numbers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MODEL_TOKEN_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|token| token.chars().any(|c| c.is_ascii_alphabetic()) && token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| !UNIT_REGEX.is_match(token))
        .filter(|token| seen.insert(token.to_uppercase()))
        .map(|token| token.to_uppercase())
        .collect()
}

/// Lower-cased tokens without stopwords, longest first, deduplicated
pub fn keyword_set(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens: Vec<String> = TOKEN_SPLIT_REGEX
        .split(&text.to_lowercase())
        .map(str::trim)
        .filter(|token| token.chars().count() >= 2)
        .filter(|token| !STOPWORDS.contains(token))
        .map(ToString::to_string)
        .filter(|token| seen.insert(token.clone()))
        .collect();
    // Stable: equal lengths keep title order
    tokens.sort_by_key(|token| std::cmp::Reverse(token.chars().count()));
    tokens
}

/// |A ∩ B| / |A ∪ B| over keyword sets; 0 when both are empty
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_brackets_and_shipping_noise() {
        let cleaned = clean_title("【新品】Canon EOS R6 ミラーレスカメラ 送料無料");
        assert!(cleaned.contains("Canon EOS R6"));
        assert!(!cleaned.contains("新品"));
        assert!(!cleaned.contains("送料無料"));
        assert!(!cleaned.contains('【'));
        assert_eq!(cleaned, "Canon EOS R6 ミラーレスカメラ");
    }

    #[test]
    fn folds_full_width_and_star_tags() {
        assert_eq!(clean_title("★激安★ ＳＯＮＹ　α7 III [美品]"), "SONY α7 III");
    }

    #[test]
    fn detects_brands_by_alias() {
        assert_eq!(detect_brand("キヤノン EOS Kiss X10"), Some("Canon"));
        assert_eq!(detect_brand("apple iphone 14"), Some("Apple"));
        assert_eq!(detect_brand("coaching manual"), None);
        assert_eq!(detect_brand("ノーブランド 腕時計"), None);
    }

    #[test]
    fn model_numbers_skip_units() {
        assert_eq!(model_numbers("SONY ILCE-7M3 128GB 24mm F1.4 R6"), vec!["ILCE-7M3", "F1", "R6"]);
        assert!(model_numbers("Apple iPhone 14 Pro 128GB").is_empty());
    }

    #[test]
    fn keywords_rank_by_length_and_drop_stopwords() {
        let keywords = keyword_set("Apple iPhone 14 Pro 128GB with ケース セット");
        assert_eq!(keywords, vec!["iphone", "apple", "128gb", "pro", "ケース", "14"]);
    }

    #[test]
    fn builds_up_to_three_distinct_queries() {
        let analysis = TitleAnalysis::new("【美品】Canon EOS R6 ボディ 送料込み", 5);
        assert_eq!(analysis.brand, Some("Canon"));
        assert_eq!(analysis.models, vec!["R6"]);
        assert_eq!(analysis.queries(), vec!["canon", "canon eos", "Canon R6"]);
    }

    #[test]
    fn jaccard_of_keyword_sets() {
        let a = keyword_set("iphone 14 pro");
        let b = keyword_set("iphone 14 plus");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }
}
