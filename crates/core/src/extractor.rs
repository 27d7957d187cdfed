use crate::error::IngestError;
use crate::models::{SkippedPage, Span, SpanPayload};
use lopdf::{Document, Object, ObjectId};

/// Everything recovered from one document: the ordered span sequence plus
/// the pages that had to be skipped instead of aborting the whole file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub spans: Vec<Span>,
    pub skipped_pages: Vec<SkippedPage>,
}

pub trait SpanExtractor: Send + Sync {
    fn extract(&self, pdf_bytes: &[u8]) -> Result<Extraction, IngestError>;
}

/// PDF extraction via lopdf. Emits one text span per page followed by one
/// image span per page XObject image. Page positions for embedded images are
/// not recovered from the content stream, so bounding regions stay unset and
/// reading order falls back to text-before-figures within a page.
#[derive(Default)]
pub struct LopdfExtractor;

impl SpanExtractor for LopdfExtractor {
    fn extract(&self, pdf_bytes: &[u8]) -> Result<Extraction, IngestError> {
        let document =
            Document::load_mem(pdf_bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if document.is_encrypted() {
            return Err(IngestError::PdfParse(
                "document is encrypted and no password was supplied".to_string(),
            ));
        }

        let mut extraction = Extraction::default();
        for (index, (page_number, page_id)) in document.get_pages().into_iter().enumerate() {
            let page_index = index as u32;

            let text = match document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(page_index, error = %error, "skipping malformed page");
                    extraction.skipped_pages.push(SkippedPage {
                        page_index,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let mut sequence_index = 0u32;
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                extraction.spans.push(Span {
                    page_index,
                    sequence_index,
                    payload: SpanPayload::Text(trimmed.to_string()),
                    bounding_region: None,
                });
                sequence_index += 1;
            }

            for image in page_images(&document, page_id) {
                extraction.spans.push(Span {
                    page_index,
                    sequence_index,
                    payload: SpanPayload::Image(image),
                    bounding_region: None,
                });
                sequence_index += 1;
            }
        }

        Ok(extraction)
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Raw byte content of every image XObject referenced by the page resources.
fn page_images(document: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
    let mut images = Vec::new();

    let Ok(page_dict) = document.get_dictionary(page_id) else {
        return images;
    };
    let Some(resources) = page_dict
        .get(b"Resources")
        .ok()
        .and_then(|object| resolve(document, object))
        .and_then(|object| object.as_dict().ok())
    else {
        return images;
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|object| resolve(document, object))
        .and_then(|object| object.as_dict().ok())
    else {
        return images;
    };

    for (_name, entry) in xobjects.iter() {
        let Some(Object::Stream(stream)) = resolve(document, entry) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|subtype| subtype.as_name().ok())
            .is_some_and(|name| name == b"Image");
        if is_image {
            images.push(stream.content.clone());
        }
    }

    images
}
