use super::ViewportState;

/// Shift the view by a screen-space delta, then clamp.
///
/// Dragging the image right (`dx > 0`) moves the view left over the image.
pub fn pan(v: ViewportState, dx: f64, dy: f64, img_w: f64, img_h: f64) -> ViewportState {
    let moved = ViewportState {
        x: v.x - dx / v.zoom,
        y: v.y - dy / v.zoom,
        ..v
    };
    clamp_viewport(moved, img_w, img_h)
}

/// Multiply the zoom by `factor`, keeping the image point under
/// `(screen_x, screen_y)` fixed on screen, then clamp.
///
/// A non-positive or NaN `factor` leaves the zoom unchanged.
pub fn zoom_around(
    v: ViewportState,
    screen_x: f64,
    screen_y: f64,
    factor: f64,
    img_w: f64,
    img_h: f64,
) -> ViewportState {
    if !(factor > 0.0) {
        return clamp_viewport(v, img_w, img_h);
    }

    let (ix, iy) = v.screen_to_image(screen_x, screen_y);
    let zoom = v.zoom * factor;
    let zoomed = ViewportState {
        x: ix - screen_x / zoom,
        y: iy - screen_y / zoom,
        zoom,
        ..v
    };
    clamp_viewport(zoomed, img_w, img_h)
}

/// Keep the view over the image.
///
/// Along an axis where the whole image fits inside the viewport at the
/// current zoom, the image is centered. Otherwise the offset is restricted
/// so the viewport stays within `[0, img_dim]`.
pub fn clamp_viewport(v: ViewportState, img_w: f64, img_h: f64) -> ViewportState {
    ViewportState {
        x: clamp_axis(v.x, v.visible_width(), img_w),
        y: clamp_axis(v.y, v.visible_height(), img_h),
        ..v
    }
}

fn clamp_axis(offset: f64, visible: f64, extent: f64) -> f64 {
    if extent <= visible {
        -(visible - extent) / 2.0
    } else {
        offset.clamp(0.0, extent - visible)
    }
}

/// Fit the whole image into a `screen_w x screen_h` viewport, centered.
pub fn center_viewport(screen_w: f64, screen_h: f64, img_w: f64, img_h: f64) -> ViewportState {
    let zoom = if img_w > 0.0 && img_h > 0.0 {
        (screen_w / img_w).min(screen_h / img_h)
    } else {
        1.0
    };
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };

    clamp_viewport(
        ViewportState::new(0.0, 0.0, screen_w, screen_h, zoom),
        img_w,
        img_h,
    )
}

/// Change the screen size while keeping the image point at the center of
/// the viewport in place.
pub fn resize(
    v: ViewportState,
    width: f64,
    height: f64,
    img_w: f64,
    img_h: f64,
) -> ViewportState {
    let (cx, cy) = v.center();
    let resized = ViewportState {
        x: cx - width / 2.0 / v.zoom,
        y: cy - height / 2.0 / v.zoom,
        width,
        height,
        ..v
    };
    clamp_viewport(resized, img_w, img_h)
}
