mod article;
mod category;
mod indicator;

pub use article::{Article, ArticleState, IngestOutcome, NewArticle, RawRecord};
pub use category::ContentCategory;
pub use indicator::{Indicator, IndicatorKind};
