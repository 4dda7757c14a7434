//! Page-Scanner
//!
//! One synchronous pass over the current document. Steps run in a fixed
//! order (scripts, inline scripts, iframes, structural selectors, images)
//! and a failure in one element or one step never stops the rest.
//!
//! Removed nodes cannot be matched again and hidden nodes are skipped, so a
//! second pass over an unchanged document takes no action.

use crate::classifier::Classifier;
use crate::dom::{Dom, HideStyle, Query};
use crate::report::Recorder;
use crate::rules::STRUCTURAL_SELECTORS;
use crate::types::{Category, EngineOptions, ScanReport, ScanSteps, IFRAME_AD_ID, INLINE_MINER_ID};

/// Runs scan passes against any [`Dom`].
#[derive(Debug, Clone, Copy)]
pub struct PageScanner<'c> {
    classifier: &'c Classifier,
    options: EngineOptions,
}

impl<'c> PageScanner<'c> {
    pub fn new(classifier: &'c Classifier, options: EngineOptions) -> Self {
        Self { classifier, options }
    }

    pub fn classifier(&self) -> &'c Classifier {
        self.classifier
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run the selected steps once.
    pub fn scan<D: Dom>(&self, dom: &mut D, steps: ScanSteps, recorder: &mut Recorder) -> ScanReport {
        let mut report = ScanReport::default();

        if steps.contains(ScanSteps::SCRIPTS) {
            report.scripts = self.scan_scripts(dom, recorder);
        }
        if steps.contains(ScanSteps::INLINE_SCRIPTS) {
            report.inline_scripts = self.scan_inline_scripts(dom, recorder);
        }
        if steps.contains(ScanSteps::IFRAMES) {
            report.iframes = self.scan_iframes(dom, recorder);
        }
        if steps.contains(ScanSteps::STRUCTURAL) {
            report.structural = self.scan_structural(dom, recorder);
        }
        if steps.contains(ScanSteps::IMAGES) {
            report.images = self.scan_images(dom, recorder);
        }

        if report.total() > 0 {
            log::info!("Scan suppressed {} element(s): {:?}", report.total(), report);
        }
        report
    }

    /// Step 1: `<script src>` matching any category.
    fn scan_scripts<D: Dom>(&self, dom: &mut D, recorder: &mut Recorder) -> usize {
        let Some(scripts) = query_or_log(dom, Query::Scripts) else {
            return 0;
        };

        let mut count = 0;
        for script in scripts {
            let Some(src) = dom.source(&script) else {
                continue;
            };
            let Some(category) = self.classifier.classify(&src) else {
                continue;
            };
            match dom.remove(&script) {
                Ok(()) => {
                    recorder.suppressed(&src, category);
                    count += 1;
                }
                Err(e) => log::warn!("Could not remove script {}: {}", src, e),
            }
        }
        count
    }

    /// Step 2: inline `<script>` bodies that look like miners.
    fn scan_inline_scripts<D: Dom>(&self, dom: &mut D, recorder: &mut Recorder) -> usize {
        let Some(scripts) = query_or_log(dom, Query::Scripts) else {
            return 0;
        };

        let mut count = 0;
        for script in scripts {
            if dom.source(&script).is_some() {
                continue;
            }
            if !self.classifier.classify_inline_content(&dom.text_content(&script)) {
                continue;
            }
            match dom.remove(&script) {
                Ok(()) => {
                    recorder.suppressed(INLINE_MINER_ID, Category::Miner);
                    count += 1;
                }
                Err(e) => log::warn!("Could not remove inline script: {}", e),
            }
        }
        count
    }

    /// Step 3: iframes, by URL, id or class.
    fn scan_iframes<D: Dom>(&self, dom: &mut D, recorder: &mut Recorder) -> usize {
        let Some(iframes) = query_or_log(dom, Query::Iframes) else {
            return 0;
        };

        let mut count = 0;
        for iframe in iframes {
            let src = dom.source(&iframe);
            let id = dom.attribute(&iframe, "id").unwrap_or_default();
            let class_name = dom.attribute(&iframe, "class").unwrap_or_default();

            if !self
                .classifier
                .classify_iframe(src.as_deref().unwrap_or(""), &id, &class_name)
            {
                continue;
            }
            match dom.remove(&iframe) {
                Ok(()) => {
                    recorder.suppressed(src.as_deref().unwrap_or(IFRAME_AD_ID), Category::Ad);
                    count += 1;
                }
                Err(e) => log::warn!("Could not remove iframe: {}", e),
            }
        }
        count
    }

    /// Step 4: visible ad containers are hidden, not removed.
    fn scan_structural<D: Dom>(&self, dom: &mut D, recorder: &mut Recorder) -> usize {
        let Some(elements) = query_or_log(dom, Query::Structural(STRUCTURAL_SELECTORS)) else {
            return 0;
        };

        let mut count = 0;
        for element in elements {
            if dom.is_hidden(&element) || !dom.box_size(&element).exceeds(self.options.min_visible_px) {
                continue;
            }
            match dom.hide(&element, HideStyle::Collapse) {
                Ok(()) => {
                    recorder.counted(Category::Ad);
                    count += 1;
                }
                Err(e) => log::warn!("Could not hide ad container: {}", e),
            }
        }
        count
    }

    /// Step 5: tracking pixels.
    fn scan_images<D: Dom>(&self, dom: &mut D, recorder: &mut Recorder) -> usize {
        let Some(images) = query_or_log(dom, Query::Images) else {
            return 0;
        };

        let mut count = 0;
        for image in images {
            if dom.is_hidden(&image) {
                continue;
            }
            let Some(src) = dom.source(&image) else {
                continue;
            };
            let size = dom.box_size(&image);
            if !self
                .classifier
                .is_tracking_pixel(&src, size.width.round() as u32, size.height.round() as u32)
            {
                continue;
            }
            match dom.hide(&image, HideStyle::DisplayNone) {
                Ok(()) => {
                    recorder.counted(Category::Tracker);
                    count += 1;
                }
                Err(e) => log::warn!("Could not hide tracking pixel {}: {}", src, e),
            }
        }
        count
    }
}

fn query_or_log<D: Dom>(dom: &D, query: Query) -> Option<Vec<D::Node>> {
    match dom.query(query) {
        Ok(nodes) => Some(nodes),
        Err(e) => {
            log::warn!("Skipping {:?} step: {}", query, e);
            None
        }
    }
}
