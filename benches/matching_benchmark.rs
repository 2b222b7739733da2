//! Title analysis, keyword similarity and page extraction throughput

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use resale_scout_lib::application::title_analysis::{TitleAnalysis, jaccard, keyword_set};
use resale_scout_lib::infrastructure::config::ExtractionConfig;
use resale_scout_lib::infrastructure::parsing::ExtractionPipeline;

const TITLES: &[&str] = &[
    "【新品未開封】Apple iPhone 14 Pro 128GB ディープパープル SIMフリー 送料無料",
    "★美品★ Canon EOS R6 ボディ ミラーレス一眼 動作確認済み",
    "[ジャンク] SONY α7 III ILCE-7M3 24mm F1.4 レンズセット",
    "ルイヴィトン モノグラム ネヴァーフル MM トートバッグ 正規品",
    "Nintendo Switch 有機ELモデル ホワイト 1円スタート",
];

const CATALOG_TITLE: &str = "Apple iPhone 14 Pro (128 GB) - Deep Purple";

fn mercari_page() -> String {
    let images: String = (0..12)
        .map(|i| format!(r#"<img src="https://static.mercdn.net/item/detail/orig/photos/m1_{i}.jpg">"#))
        .collect();
    format!(
        r#"<html><head>
             <link rel="canonical" href="https://jp.mercari.com/item/m12345678901">
             <meta property="og:title" content="Apple iPhone 14 Pro 128GB - メルカリ">
           </head><body>
             <div data-testid="name"><h1>Apple iPhone 14 Pro 128GB</h1></div>
             <div data-testid="price">¥158,000</div>
             <div data-testid="商品の状態">目立った傷や汚れなし</div>
             <div data-testid="image-gallery">{images}</div>
             <div data-testid="description">{}</div>
           </body></html>"#,
        "バッテリー最大容量 92%。".repeat(40)
    )
}

fn bench_title_analysis(c: &mut Criterion) {
    c.bench_function("title_analysis", |b| {
        b.iter(|| {
            for title in TITLES {
                black_box(TitleAnalysis::new(black_box(title), 5).queries());
            }
        });
    });
}

fn bench_similarity(c: &mut Criterion) {
    let source = keyword_set(TITLES[0]);
    c.bench_function("keyword_jaccard", |b| {
        b.iter(|| black_box(jaccard(&source, &keyword_set(black_box(CATALOG_TITLE)))));
    });
}

fn bench_extraction(c: &mut Criterion) {
    let pipeline = ExtractionPipeline::new(ExtractionConfig::default());
    let page = mercari_page();
    c.bench_function("extract_mercari_page", |b| {
        b.iter(|| black_box(pipeline.extract("https://jp.mercari.com/item/m12345678901", black_box(&page))));
    });
}

criterion_group!(benches, bench_title_analysis, bench_similarity, bench_extraction);
criterion_main!(benches);
