use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classifier::PUBLISHED_URL_MARKER;
use crate::content::PostItem;

/// Everything the automation agent needs to publish one post.
#[derive(Debug, Clone, Serialize)]
pub struct PublishTask {
    pub title: String,
    pub caption: String,
    pub image_paths: Vec<PathBuf>,
    pub publish_url: String,
    pub instructions: String,
}

impl PublishTask {
    pub fn for_item(item: &PostItem, publish_url: &str) -> Self {
        let caption = item.caption();
        let image_paths = item.image_paths();
        let image = image_paths
            .first()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "无".to_string());
        let instructions = format!(
            "Publish an image note on the creator platform.\n\
             1. Open {publish_url} and choose the image-and-text (图文) mode, not video.\n\
             2. Upload exactly one image: {image}. Wait until a preview thumbnail is shown and \
                the title and body inputs appear; if the page still shows the drop zone, upload again.\n\
             3. Title: {title}\n\
             4. Body (keep tags as written):\n{caption}\n\
             5. Do not click any topic (话题) button. Click 发布 to submit.\n\
             Success means a success notice is shown or the page URL contains \"{marker}\". \
             If the page says 你访问的页面不见了 or stays blank, reload the publish page and continue. \
             Finish by reporting the outcome and the final page URL.",
            title = item.title,
            marker = PUBLISHED_URL_MARKER,
        );
        Self {
            title: item.title.clone(),
            caption,
            image_paths,
            publish_url: publish_url.to_string(),
            instructions,
        }
    }
}

/// What the agent reported: its final answer and the whole execution trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub result_text: String,
    #[serde(default)]
    pub full_result_text: String,
}

impl AttemptResult {
    pub fn new(result_text: impl Into<String>, full_result_text: impl Into<String>) -> Self {
        Self {
            result_text: result_text.into(),
            full_result_text: full_result_text.into(),
        }
    }
}
